use std::sync::Arc;

use healthybites_core::menu::Menu;

use crate::clock::Clock;
use crate::conversation::ConversationEngine;
use crate::lifecycle::OrderLifecycle;
use crate::locks::KeyedLocks;
use crate::store::{KeyValueStore, Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub kv: Arc<dyn KeyValueStore>,
    pub engine: Arc<ConversationEngine>,
    pub lifecycle: Arc<OrderLifecycle>,
    pub locks: Arc<KeyedLocks>,
    pub menu: Arc<Menu>,
    pub clock: Arc<dyn Clock>,
}
