/// Frees an exercise port from whatever process is still bound to it.
///
/// Advisory only: a lookup failure or an empty port is not an error.
/// Returns the pids that were signalled.
#[mockall::automock]
#[async_trait::async_trait]
pub trait PortReclaimer: std::fmt::Debug + Send + Sync {
    async fn reclaim(&self, port: u16) -> Vec<u32>;
}
