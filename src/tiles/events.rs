use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::core::tile_id::OverscaledTileId;
use crate::tiles::source::TileLoadError;

/// What a data event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Tile content of the source
    Source,
}

/// Notifications emitted by a [`SourceCache`](crate::tiles::source_cache::SourceCache)
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// A tile started loading
    DataLoading {
        data_type: DataType,
        tile_id: OverscaledTileId,
    },
    /// A tile finished loading
    Data {
        data_type: DataType,
        tile_id: OverscaledTileId,
    },
    Error {
        tile_id: OverscaledTileId,
        error: TileLoadError,
    },
}

impl SourceEvent {
    pub fn tile_id(&self) -> OverscaledTileId {
        match self {
            SourceEvent::DataLoading { tile_id, .. }
            | SourceEvent::Data { tile_id, .. }
            | SourceEvent::Error { tile_id, .. } => *tile_id,
        }
    }
}

/// Fans events out to every live subscriber
#[derive(Debug, Default)]
pub(crate) struct EventEmitter {
    subscribers: Vec<Sender<SourceEvent>>,
}

impl EventEmitter {
    pub fn subscribe(&mut self) -> Receiver<SourceEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Dropped receivers are forgotten
    pub fn emit(&mut self, event: SourceEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_and_drop() {
        let mut emitter = EventEmitter::default();
        let first = emitter.subscribe();
        let second = emitter.subscribe();
        let tile_id = OverscaledTileId::new(1, 0, 1, 0, 1);

        emitter.emit(SourceEvent::Data {
            data_type: DataType::Source,
            tile_id,
        });
        assert_eq!(first.try_recv().unwrap().tile_id(), tile_id);
        assert_eq!(second.try_recv().unwrap().tile_id(), tile_id);

        drop(second);
        emitter.emit(SourceEvent::DataLoading {
            data_type: DataType::Source,
            tile_id,
        });
        assert_eq!(emitter.subscriber_count(), 1);
        assert!(matches!(first.try_recv(), Ok(SourceEvent::DataLoading { .. })));
    }
}
