use std::sync::Weak;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::transport::MessageReader;

use super::dispatch::dispatch;
use super::{Connection, DisconnectCause, Inner};

/// Start the one thread that reads from the transport.
///
/// It holds the connection weakly so dropping every handle still lets it
/// wind down once the socket closes.
pub(crate) fn spawn(inner: Weak<Inner>, mut reader: MessageReader) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("dbuslink-reader".into())
        .spawn(move || {
            loop {
                let result = reader.read_message();
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let conn = Connection { inner };
                let cause = match result {
                    Ok(Some(message)) => {
                        dispatch(&conn, message);
                        continue;
                    }
                    Ok(None) => DisconnectCause::Transport("peer closed the connection".into()),
                    Err(err) => {
                        if !conn.inner.state().is_closing() {
                            error!(error = %err, "read failed");
                        }
                        DisconnectCause::Transport(err.to_string())
                    }
                };
                if !conn.inner.state().is_closing() {
                    debug!(%cause, "reader stopping");
                }
                conn.inner.teardown(cause);
                break;
            }
        })
}
