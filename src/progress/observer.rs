use async_trait::async_trait;

/// Event sink for download lifecycle transitions.
///
/// One observer can be attached per downloader; every method has a no-op
/// default, so implementors only override the transitions they care about.
/// Each method is invoked at most once per state transition and must not
/// block longer than the monitor tick.
///
/// Lifecycle:
/// - `on_execute` fires once, just before the workers start.
/// - `on_pause` / `on_resume` / `on_cancel` fire on the corresponding
///   control calls, only when the call actually changed state.
/// - `on_finish` fires once after the monitor exits, on success and on
///   failure alike.
#[async_trait]
pub trait DownloadObserver: Send + Sync + 'static {
    async fn on_execute(&self) {}
    async fn on_finish(&self) {}
    async fn on_pause(&self) {}
    async fn on_resume(&self) {}
    async fn on_cancel(&self) {}
}
