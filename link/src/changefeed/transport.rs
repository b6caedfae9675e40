use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;
use crate::models::ChangeEvent;

/// Stream of change events for one table.
///
/// An `Err` item or the end of the stream means the connection is gone; the
/// feed client drops the stream and reconnects.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent>>;

/// Remote changefeed collaborator: opens one live channel per table.
///
/// Delivery is at-least-once; the cache absorbs duplicates.
#[async_trait]
pub trait ChangeFeedTransport: Send + Sync {
    async fn connect(&self, table: &str) -> Result<ChangeStream>;
}
