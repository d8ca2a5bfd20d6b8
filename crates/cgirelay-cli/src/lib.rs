// Copyright 2025 cgirelay Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # cgirelay CLI
//!
//! Command-line surface of cgirelay.
//!
//! - `cgirelay submit`: the per-request CGI entry point. Reads the CGI
//!   environment and form input, forwards them to a worker and streams the
//!   worker's response to stdout.
//! - `cgirelay show|load|status|sketch|showall|clean|stop|kill|stopscript`:
//!   fleet administration over every registered worker.
//! - `cgirelay-echo-worker`: a small worker program for trying the relay out.
//!
//! Fleet reports are rendered to text by [`report`].

pub mod report;

pub use report::render_report;

/// Installs the `fmt` subscriber on stderr.
///
/// `RUST_LOG` overrides `default_level`.
pub fn init_tracing(default_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
