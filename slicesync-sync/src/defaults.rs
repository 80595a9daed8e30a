//! Default value resolution.

use crate::config::{SliceConfig, SliceValue};
use slicesync_types::ExecutionMode;

/// The value a slice falls back to in `mode`.
///
/// In server mode this is the server default when one is configured and the
/// client default otherwise; in client mode it is always the client default.
pub fn resolve<T: SliceValue>(config: &SliceConfig<T>, mode: ExecutionMode) -> T {
    match (mode, config.default_server()) {
        (ExecutionMode::Server, Some(server)) => server.clone(),
        _ => config.default_client().clone(),
    }
}
