//! Development document store (`docsync serve`).

use anyhow::Result;

pub async fn cmd_serve(port: u16, dev: bool) -> Result<()> {
    let host = if dev { "0.0.0.0" } else { "127.0.0.1" };
    docsync::server::serve_until_ctrl_c(host, port, dev).await
}
