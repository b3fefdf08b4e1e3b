/// Lifecycle and traffic events emitted by a protocol engine.
///
/// Delivered over a broadcast channel rather than direct callbacks: a slow
/// or panicking subscriber only drops its own lagged messages, it can never
/// stall or crash the reader/sender/print loops.
#[derive(Debug, Clone)]
pub enum PrinterEvent {
    Connect,
    Disconnect,
    Send { raw: String },
    Receive { line: String },
    Online,
    Temp { line: String },
    Error { line: String },
    Start { resuming: bool },
    End,
}
