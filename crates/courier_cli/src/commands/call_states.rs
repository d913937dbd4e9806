//! Call states command implementation.

use courier_calling::{CallSignals, VoiceChannelState};
use serde::Serialize;

/// One row of the state table.
#[derive(Debug, Serialize)]
pub struct StateRow {
    /// Input signals.
    #[serde(flatten)]
    pub signals: CallSignals,
    /// Derived state.
    pub state: VoiceChannelState,
}

/// Builds the table for every signal combination.
pub fn table() -> Vec<StateRow> {
    CallSignals::all()
        .map(|signals| StateRow {
            state: signals.state(),
            signals,
        })
        .collect()
}

/// Runs the call states command.
pub fn run(format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let rows = table();
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => print_text_output(&rows),
    }
    Ok(())
}

fn print_text_output(rows: &[StateRow]) {
    let flag = |b: bool| if b { "x" } else { "." };

    println!("ignoring self other device flow  state");
    for row in rows {
        let s = &row.signals;
        println!(
            "{:^8} {:^4} {:^5} {:^6} {:^4}  {}",
            flag(s.ignoring_call),
            flag(s.self_joined),
            flag(s.other_joined),
            flag(s.device_active),
            flag(s.flow_active),
            row.state
        );
    }
}
