#[cfg(test)]
mod async_loading_tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use futures::FutureExt;
    use tilepyramid::prelude::*;
    use tokio::sync::oneshot;

    type Reply = std::result::Result<TilePayload, TileLoadError>;

    /// Loads stay pending until the test answers them
    #[derive(Default)]
    struct DeferredSource {
        pending: RefCell<Vec<(OverscaledTileId, oneshot::Sender<Reply>)>>,
    }

    impl DeferredSource {
        /// Answer every outstanding request for `tile_id`, oldest first
        fn answer(&self, tile_id: OverscaledTileId, reply: impl Fn() -> Reply) -> usize {
            let mut pending = self.pending.borrow_mut();
            let (matching, rest): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|(id, _)| *id == tile_id);
            *pending = rest;
            let answered = matching.len();
            for (_, sender) in matching {
                let _ = sender.send(reply());
            }
            answered
        }

        fn answer_all(&self, reply: impl Fn() -> Reply) -> usize {
            let senders: Vec<_> = self.pending.borrow_mut().drain(..).collect();
            let count = senders.len();
            for (_, sender) in senders {
                let _ = sender.send(reply());
            }
            count
        }

        fn outstanding(&self) -> usize {
            self.pending.borrow().len()
        }
    }

    impl TileSource for DeferredSource {
        fn source_type(&self) -> SourceType {
            SourceType::Vector
        }

        fn max_zoom(&self) -> u8 {
            14
        }

        fn load_tile(&self, request: TileRequest) -> TileLoadFuture {
            let (tx, rx) = oneshot::channel();
            self.pending.borrow_mut().push((request.tile_id, tx));
            async move {
                rx.await
                    .unwrap_or_else(|_| Err(TileLoadError::transient("request dropped")))
            }
            .boxed_local()
        }
    }

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn setup() -> (Rc<DeferredSource>, SourceCache) {
        init_logger();
        let source = Rc::new(DeferredSource::default());
        let dyn_source: Rc<dyn TileSource> = source.clone();
        let cache = SourceCache::new("deferred", dyn_source, SourceCacheOptions::default()).unwrap();
        (source, cache)
    }

    fn viewport(zoom: f64) -> Transform {
        let mut transform = Transform::new();
        transform.resize(512.0, 512.0).unwrap();
        transform.set_zoom(zoom).unwrap();
        transform
    }

    fn ok() -> Reply {
        Ok(TilePayload::new(vec![1, 2, 3]))
    }

    #[tokio::test]
    async fn test_loads_complete_asynchronously() {
        let (source, mut cache) = setup();
        let events = cache.subscribe();

        cache.update(&viewport(1.0));
        assert_eq!(cache.pending_loads(), 4);
        assert!(!cache.loaded());
        assert!(cache.get_renderable_ids(false).is_empty());

        assert_eq!(source.answer_all(ok), 4);
        let mut completed = Vec::new();
        while let Some(tile_id) = cache.next_loaded().await {
            completed.push(tile_id);
        }
        assert_eq!(completed.len(), 4);
        assert!(cache.loaded());
        assert_eq!(cache.get_renderable_ids(false).len(), 4);

        let events: Vec<SourceEvent> = events.try_iter().collect();
        let loading = events
            .iter()
            .filter(|e| matches!(e, SourceEvent::DataLoading { .. }))
            .count();
        let data = events
            .iter()
            .filter(|e| matches!(e, SourceEvent::Data { data_type: DataType::Source, .. }))
            .count();
        assert_eq!((loading, data), (4, 4));
    }

    #[tokio::test]
    async fn test_late_response_for_removed_tile_is_ignored() {
        let (source, mut cache) = setup();
        let events = cache.subscribe();
        cache.update(&viewport(1.0));

        cache.set_used(false);
        cache.update(&viewport(1.0));
        assert_eq!(cache.tile_count(), 0);
        assert_eq!(cache.pending_loads(), 0);

        source.answer_all(ok);
        assert_eq!(cache.next_loaded().await, None);
        assert!(events
            .try_iter()
            .all(|e| matches!(e, SourceEvent::DataLoading { .. })));
        assert!(cache.cache().is_empty(), "tiles without data are never cached");
    }

    #[tokio::test]
    async fn test_transient_error_is_reported() {
        let (source, mut cache) = setup();
        let events = cache.subscribe();
        cache.update(&viewport(1.0));

        let failing = OverscaledTileId::new(1, 0, 1, 1, 1);
        source.answer(failing, || Err(TileLoadError::transient("connection reset")));
        assert_eq!(cache.next_loaded().await, Some(failing));

        let tile = cache.get_tile(&failing).unwrap();
        assert_eq!(tile.state(), TileState::Errored);
        assert_eq!(tile.error().map(|e| e.kind), Some(TileErrorKind::Transient));

        let errors: Vec<SourceEvent> = events
            .try_iter()
            .filter(|e| matches!(e, SourceEvent::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].tile_id(), failing);
    }

    #[tokio::test]
    async fn test_not_found_requests_parent() {
        let (source, mut cache) = setup();
        let events = cache.subscribe();
        cache.update(&viewport(1.0));

        let missing = OverscaledTileId::new(1, 0, 1, 0, 0);
        source.answer(missing, || Err(TileLoadError::not_found("no such tile")));
        assert_eq!(cache.next_loaded().await, Some(missing));

        let root = OverscaledTileId::new(0, 0, 0, 0, 0);
        assert_eq!(
            cache.get_tile(&root).map(Tile::state),
            Some(TileState::Loading),
            "the parent should be requested as a stand-in"
        );
        assert_eq!(cache.pending_loads(), 4);
        assert!(events
            .try_iter()
            .all(|e| !matches!(e, SourceEvent::Error { .. })));

        source.answer(root, ok);
        assert_eq!(cache.next_loaded().await, Some(root));
        assert_eq!(cache.get_renderable_ids(false), vec![root]);
    }

    #[tokio::test]
    async fn test_process_ready_loads_applies_settled_loads() {
        let (source, mut cache) = setup();
        cache.update(&viewport(1.0));

        source.answer(OverscaledTileId::new(1, 0, 1, 0, 0), ok);
        source.answer(OverscaledTileId::new(1, 0, 1, 1, 0), ok);
        assert_eq!(cache.process_ready_loads(), 2);
        assert_eq!(cache.pending_loads(), 2);
        assert_eq!(cache.process_ready_loads(), 0);
    }

    #[tokio::test]
    async fn test_reload_supersedes_pending_load() {
        let (source, mut cache) = setup();
        cache.update(&viewport(0.0));
        let root = OverscaledTileId::new(0, 0, 0, 0, 0);

        cache.reload();
        assert_eq!(source.outstanding(), 2);
        assert_eq!(cache.pending_loads(), 1);
        assert_eq!(cache.get_tile(&root).map(Tile::state), Some(TileState::Loading));

        // both requests answer; only the second one is applied
        let mut replies = vec![1u8, 2u8].into_iter();
        let senders: Vec<_> = source.pending.borrow_mut().drain(..).collect();
        for (_, sender) in senders {
            let byte = replies.next().unwrap();
            let _ = sender.send(Ok(TilePayload::new(vec![byte])));
        }

        assert_eq!(cache.next_loaded().await, Some(root));
        assert_eq!(cache.next_loaded().await, None);
        let data = cache.get_tile(&root).and_then(Tile::data).unwrap();
        assert_eq!(data.as_slice(), &[2]);
    }
}
