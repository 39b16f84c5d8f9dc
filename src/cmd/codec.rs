//! Binary state helpers (`docsync encode`, `docsync render`, `docsync merge`).

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;

use docsync::codec;
use docsync::merge::{UpdateMerger, YrsMerger};

/// Base64 passed inline, or `@path` to a file holding it.
fn read_base64_arg(arg: &str) -> Result<Vec<u8>> {
    let encoded = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path))?,
        None => arg.to_string(),
    };
    codec::decode_persisted(Some(&encoded)).context("Input is not valid base64")
}

fn read_text(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("Failed to read stdin")?;
        return Ok(content);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn cmd_encode(html: &Path) -> Result<()> {
    let content = read_text(html)?;
    let binary = codec::derive_from_html(&content);
    println!("{}", codec::encode_persisted(&binary));
    Ok(())
}

pub fn cmd_render(input: &str, json: bool) -> Result<()> {
    let binary = read_base64_arg(input)?;
    let html = codec::render_html(&binary).context("Failed to load binary state")?;
    if json {
        let value = docsync::html::to_prosemirror_json(&html);
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", html);
    }
    Ok(())
}

pub fn cmd_merge(remote: &str, local: &str) -> Result<()> {
    let remote = read_base64_arg(remote).context("Invalid remote snapshot")?;
    let local = read_base64_arg(local).context("Invalid local delta")?;
    let merged = YrsMerger.merge(&remote, &local)?;
    println!("{}", codec::encode_persisted(&merged));
    Ok(())
}
