use async_trait::async_trait;

use super::PoolError;

/// Creates and retires the handles a [`ResourcePool`](super::ResourcePool) lends out
#[async_trait]
pub trait ResourceFactory<R>: Send + Sync
where
    R: Send + Sync + 'static,
{
    /// Open a new handle
    ///
    /// A failure is returned only to the caller whose borrow triggered the
    /// creation.
    async fn create(&self) -> Result<R, PoolError>;

    /// Close a handle the pool no longer needs
    async fn destroy(&self, _resource: &R) {}

    /// Checked before an idle handle is lent out; invalid handles are destroyed
    fn is_valid(&self, _resource: &R) -> bool {
        true
    }
}
