use cgirelay_common::{Document, Env};

/// Application logic hosted by a worker.
///
/// The worker calls [`FormHandler::submit`] for every forwarded form, one at a
/// time, on a blocking thread. State kept between calls is the session state
/// the dispatcher routes requests back to.
pub trait FormHandler: Send + Sync + 'static {
    /// Handles one submission and returns the response document.
    fn submit(&self, server_env: &Env, form_env: &Env) -> Document;

    /// Drops expired session state. Returns the number of entries purged.
    fn purge_expired(&self) -> usize {
        0
    }

    /// Names of the registered event handlers, for `SketchHandlers`.
    fn handler_names(&self) -> Vec<String> {
        Vec::new()
    }
}
