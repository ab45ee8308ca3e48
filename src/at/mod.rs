//! AT protocol layer: transport, line assembly, command dispatch and
//! unsolicited-line classification.

pub mod channels;
pub mod command;
pub mod dispatcher;
pub mod fields;
pub mod line;
pub mod transport;
pub mod urc;

pub use command::{Command, Response, ResponseMatcher};
pub use dispatcher::{Completion, Dispatcher, LineRoute};
pub use line::{Line, LineReader};
pub use transport::Transport;
pub use urc::{Parsed, Urc, UrcParser};
