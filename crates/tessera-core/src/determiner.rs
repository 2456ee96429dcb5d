//! # Async Function Determiner
//!
//! Decides whether a user function is asynchronous.
//!
//! Functions declared `async` are classified without running them. Anything
//! else is invoked once inside the caller's session with tracking
//! suspended: a promise result marks it async. The trial call writes only to
//! the session's entity references, which teardown discards, so nothing it does
//! reaches the patch tracker or the variable state.

use crate::logs::{LogCategory, LogLevel};
use crate::primitives::{ASYNC_FLAG, DATA_FIELD_FLAG};
use crate::sandbox::SandboxSession;
use crate::value::Value;

/// Async classification by trial call.
pub struct AsyncDeterminer;

impl AsyncDeterminer {
    /// Classify `callable`. Never fails: trial-call errors are logged under
    /// [`LogCategory::ClassificationProbe`] and classify as sync.
    pub fn classify(session: &mut SandboxSession<'_>, callable: &Value, context: Option<&str>) -> bool {
        session.install_flag(DATA_FIELD_FLAG, true);
        session.install_flag(ASYNC_FLAG, false);

        let Value::Function(function) = callable else {
            return false;
        };
        if function.is_async() {
            session.install_flag(ASYNC_FLAG, true);
            return true;
        }

        let was_tracking = session.suspend_tracking();
        let result = session.call(function, Vec::new());
        session.restore_tracking(was_tracking);

        match result {
            Ok(value) if value.is_promise() => session.install_flag(ASYNC_FLAG, true),
            Ok(_) => {}
            Err(e) => session.log(
                LogLevel::Error,
                LogCategory::ClassificationProbe,
                context,
                format!("Error when determining async function {}", e),
            ),
        }
        session.flag(ASYNC_FLAG)
    }
}
