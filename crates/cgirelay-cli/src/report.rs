//! Plain-text rendering of fleet reports.

use cgirelay_common::transport::split_framed;
use cgirelay_dispatcher::{EntryOutcome, FleetEntry, FleetReport};
use std::fmt::Write;

/// Renders `report` the way the admin commands print it.
///
/// One line per worker for short answers; worker documents are printed under
/// a `== port (pid N) ==` heading with their headers stripped. Commands that
/// change the fleet end with the registry as it stands afterwards.
pub fn render_report(report: &FleetReport) -> String {
    let mut out = String::new();

    if report.entries.is_empty() {
        out.push_str("no workers registered\n");
    }
    for entry in &report.entries {
        render_entry(&mut out, report.command, entry);
    }

    if let Some(remaining) = &report.remaining {
        let _ = writeln!(out, "{} worker(s) remaining", remaining.len());
        for record in remaining {
            let _ = writeln!(out, "  {}", record);
        }
    }

    out
}

fn render_entry(out: &mut String, command: &str, entry: &FleetEntry) {
    let record = &entry.record;
    let _ = match &entry.outcome {
        EntryOutcome::Listed => writeln!(out, "{}", record),
        EntryOutcome::Load(load) => write!(out, "{}: {}", record.port, load.as_line()),
        EntryOutcome::Document(bytes) => {
            let (_, body) = split_framed(bytes);
            let _ = writeln!(out, "== {} (pid {}) ==", record.port, record.pid);
            out.push_str(&String::from_utf8_lossy(body));
            if !body.is_empty() && !body.ends_with(b"\n") {
                out.push('\n');
            }
            Ok(())
        }
        EntryOutcome::Sent => writeln!(out, "{}: {} sent", record.port, command),
        EntryOutcome::Killed => writeln!(out, "{}: killed pid {}", record.port, record.pid),
        EntryOutcome::Failed(reason) => writeln!(out, "{}: error: {}", record.port, reason),
    };
}
