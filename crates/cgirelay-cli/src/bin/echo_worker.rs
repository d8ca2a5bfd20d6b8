//! Demo worker: answers every submission with a page echoing the form.
//!
//! ```bash
//! cgirelay submit /cgi-bin/echo echo "$(which cgirelay-echo-worker)"
//! ```

use anyhow::Result;
use cgirelay_cli::init_tracing;
use cgirelay_common::{Document, Env, RelayConfig, SessionKey, SESSION_KEY_FIELD};
use cgirelay_dispatcher::escape_html;
use cgirelay_server::{run_worker, FormHandler, WorkerArgs, WorkerConfig};
use std::sync::atomic::{AtomicU64, Ordering};

struct EchoHandler {
    port: String,
    key: SessionKey,
    pages: AtomicU64,
}

impl FormHandler for EchoHandler {
    fn submit(&self, server_env: &Env, form_env: &Env) -> Document {
        let page = self.pages.fetch_add(1, Ordering::Relaxed) + 1;
        let script = server_env
            .iter()
            .find(|(k, _)| k == "SCRIPT_NAME")
            .map(|(_, v)| v.as_str())
            .unwrap_or("");

        let mut body = format!(
            "<html><body>\n<h1>{}</h1>\n<p>page {}</p>\n<ul>\n",
            escape_html(&self.port),
            page
        );
        for (name, value) in form_env {
            body.push_str(&format!("<li>{} = {}</li>\n", escape_html(name), escape_html(value)));
        }
        body.push_str(&format!(
            "</ul>\n<form method=\"post\" action=\"{}\">\n\
             <input type=\"hidden\" name=\"{}\" value=\"{}\">\n\
             <input name=\"text\"> <input type=\"submit\">\n\
             </form>\n</body></html>\n",
            escape_html(script),
            SESSION_KEY_FIELD,
            self.key
        ));

        Document::html(body)
    }

    fn handler_names(&self) -> Vec<String> {
        vec!["echo".to_string()]
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");

    let args = WorkerArgs::from_env()?;
    let handler = EchoHandler {
        port: args.port.clone(),
        key: args.script_key.clone(),
        pages: AtomicU64::new(0),
    };

    run_worker(&RelayConfig::from_env(), &args, handler, WorkerConfig::default()).await?;
    Ok(())
}
