//! Line-based editing session (`docsync edit`).
//!
//! Each stdin line is appended to the document as a paragraph. Lines starting
//! with `:` are session commands:
//!
//! | Command      | Effect                                  |
//! |--------------|-----------------------------------------|
//! | `:status`    | print liveness and autosave counters    |
//! | `:flush`     | save now, as on blur                    |
//! | `:focus`     | probe now, as on window focus           |
//! | `:reconnect` | probe now, as on network reconnect      |
//! | `:resolve`   | merge server-side, apply the result     |
//! | `:show`      | print the current HTML                  |
//!
//! EOF or Ctrl+C flushes pending work and ends the session.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use docsync::config::SyncConfig;
use docsync::editor::{EditorSurface, MemoryEditor};
use docsync::liveness::HttpHealthProbe;
use docsync::merge::YrsMerger;
use docsync::session::{SessionStatus, SyncSession};
use docsync::store::{DocumentId, DocumentStore, HttpDocumentStore};

use super::super::EditArgs;

fn document_id(args: &EditArgs) -> DocumentId {
    match (&args.page, &args.issue) {
        (Some(page), _) => DocumentId::page(&args.workspace, &args.project, page),
        (None, Some(issue)) => DocumentId::issue(&args.workspace, &args.project, issue),
        // clap requires one of the two
        (None, None) => DocumentId::page(&args.workspace, &args.project, ""),
    }
}

fn print_status(status: &SessionStatus) {
    let liveness = match status.liveness {
        docsync::liveness::LivenessState::Healthy => console::style("healthy").green(),
        docsync::liveness::LivenessState::Degraded => console::style("degraded").yellow(),
    };
    let last_synced = status
        .last_synced_at
        .map(|at| at.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    eprintln!(
        "{} {} | transport {} | saves {} ({} failed) | last fallback save {}",
        console::style("session").dim(),
        status.document,
        liveness,
        status.autosave_attempts,
        status.autosave_failures,
        last_synced
    );
}

pub async fn cmd_edit(config: &SyncConfig, args: &EditArgs) -> Result<()> {
    let document = document_id(args);
    let store = Arc::new(HttpDocumentStore::new(
        &config.api_base_url(),
        config.api_token(),
        config.probe_timeout(),
    )?);
    let probe = Arc::new(HttpHealthProbe::new(
        &config.live_url(),
        config.probe_timeout(),
    )?);

    let editor = match store.fetch_binary(&document).await {
        Ok(Some(binary)) => Arc::new(MemoryEditor::with_binary(binary)),
        Ok(None) => Arc::new(MemoryEditor::from_saved(None, None)),
        Err(e) => {
            tracing::warn!(error = %e, "could not load saved document, starting empty");
            Arc::new(MemoryEditor::from_saved(None, None))
        }
    };

    let session = SyncSession::new(
        document.clone(),
        editor.clone(),
        store,
        probe,
        Arc::new(YrsMerger),
        config.session_config(),
    );
    session.start();
    eprintln!(
        "{} {} (session {}, Ctrl+D to finish)",
        console::style("Editing").bold().cyan(),
        document,
        session.id()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match line.trim() {
            ":status" => print_status(&session.status()),
            ":flush" => {
                session.flush();
            }
            ":focus" => session.monitor().notify_focus(),
            ":reconnect" => session.monitor().notify_reconnect(),
            ":resolve" => {
                let outcome = if session.resolve_conflicts().await {
                    console::style("resolved").green()
                } else {
                    console::style("not resolved").yellow()
                };
                eprintln!("{} {}", console::style("conflicts").dim(), outcome);
            }
            ":show" => println!("{}", editor.get_document().html),
            "" => {}
            text => {
                editor.append_paragraph(text)?;
                session.note_local_edit();
            }
        }
    }

    session.close().await;
    let status = session.status();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
        println!("{}", editor.get_document().html);
    }
    Ok(())
}
