use progress_protocol::ProgressMessage;

/// Receiver of bus messages.
///
/// `receive` runs on the publisher's thread. Returning an error (or panicking)
/// only affects this subscriber's delivery; the bus logs it and moves on.
pub trait Subscriber: Send + Sync {
    /// Label used in log lines.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn receive(&self, message: &ProgressMessage) -> anyhow::Result<()>;
}
