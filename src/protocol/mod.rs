//! Wire protocol.
//!
//! Requests and responses are `|`-delimited, `\n`-terminated UTF-8 lines:
//!
//! ```text
//! Request:   <id>|<command>|<arg>|...
//! Response:  <id>|response|<field>|...
//! Failure:   <id>|error|<message>
//! Readiness: 0|ready|
//! ```
//!
//! - `codec`: byte-stream to line framing
//! - `request`: request line decoding
//! - `frame`: response line encoding and parsing

pub mod codec;
pub mod frame;
pub mod request;

pub use codec::{LineAssembler, LineResult, MAX_LINE_BYTES};
pub use frame::{Frame, Tag, READY_ID};
pub use request::{Request, DELIMITER};
