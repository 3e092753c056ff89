// Order execution and lifecycle module
pub mod executor;
pub mod gateway;
pub mod paper;
pub mod position_manager;
pub mod price_feed;

pub use executor::{ExecutionAction, ExecutionDecision, Executor};
pub use gateway::{BrokerPosition, FillMode, GatewayError, OrderGateway, OrderRequest};
pub use paper::PaperGateway;
pub use position_manager::{EntryBlock, Position, PositionManager, Slot, SyncReport};
pub use price_feed::{FeedError, MarketFeed};
