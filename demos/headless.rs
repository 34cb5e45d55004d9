use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::FutureExt;
use tilepyramid::prelude::*;

/// Serves synthetic tiles once the "network" is pumped
#[derive(Default)]
struct InMemorySource {
    in_flight: RefCell<Vec<(TileRequest, oneshot::Sender<std::result::Result<TilePayload, TileLoadError>>)>>,
}

impl InMemorySource {
    /// Answer every outstanding request. Tiles deeper than z6 do not exist.
    fn pump(&self) -> usize {
        let in_flight: Vec<_> = self.in_flight.borrow_mut().drain(..).collect();
        let count = in_flight.len();
        for (request, sender) in in_flight {
            let id = request.tile_id.canonical;
            let reply = if id.z > 6 {
                Err(TileLoadError::not_found(format!("no data for {}", id)))
            } else {
                Ok(TilePayload::new(format!("{}/{}/{}", id.z, id.x, id.y).into_bytes())
                    .with_symbol_buckets(true))
            };
            let _ = sender.send(reply);
        }
        count
    }
}

impl TileSource for InMemorySource {
    fn source_type(&self) -> SourceType {
        SourceType::Vector
    }

    fn max_zoom(&self) -> u8 {
        14
    }

    fn load_tile(&self, request: TileRequest) -> TileLoadFuture {
        let (tx, rx) = oneshot::channel();
        self.in_flight.borrow_mut().push((request, tx));
        async move { rx.await.unwrap_or_else(|_| Err(TileLoadError::suppressed("cancelled"))) }
            .boxed_local()
    }
}

/// Example of driving a source cache without any renderer
fn main() -> tilepyramid::Result<()> {
    env_logger::init();

    println!("tilepyramid headless example");
    println!("============================");

    let source = Rc::new(InMemorySource::default());
    let dyn_source: Rc<dyn TileSource> = source.clone();
    let mut cache = SourceCache::new("memory", dyn_source, CacheProfile::Balanced.resolve())?;
    let events = cache.subscribe();

    let mut transform = Transform::new();
    transform.resize(1024.0, 768.0)?;

    let views = [
        ("San Francisco", LatLng::new(37.7749, -122.4194), 5.0),
        ("New York", LatLng::new(40.7128, -74.0060), 6.5),
        ("Tokyo", LatLng::new(35.6762, 139.6503), 8.0),
        ("Across the antimeridian", LatLng::new(35.6762, 139.6503 + 360.0), 8.0),
    ];

    for (name, center, zoom) in views {
        transform.set_center(center)?;
        transform.set_zoom(zoom)?;
        cache.update(&transform);
        println!("\n{} at zoom {}", name, zoom);
        println!("   requested: {} loads in flight", cache.pending_loads());

        // answering may request stand-in parents, so pump until quiet
        while source.pump() > 0 {
            let applied = cache.process_ready_loads();
            log::debug!("applied {} loads", applied);
        }

        let renderable = cache.get_renderable_ids(false);
        println!(
            "   live: {}, renderable: {}, cached: {}",
            cache.tile_count(),
            renderable.len(),
            cache.cache().len()
        );
        if let Some(first) = renderable.first() {
            println!("   first drawn: {}", first);
        }

        let hits = cache.tiles_in(&[transform.center_point()], transform.max_pitch_scale_factor(), false);
        for hit in hits {
            println!(
                "   center hits {} at ({:.0}, {:.0})",
                hit.tile_id, hit.query_geometry[0].x, hit.query_geometry[0].y
            );
        }
    }

    cache.release_symbol_fade_tiles();
    let received = events.try_iter().count();
    println!("\nEvents received: {}", received);
    println!("Loaded: {}", cache.loaded());
    println!("Source: {}", cache.serialize());

    Ok(())
}
