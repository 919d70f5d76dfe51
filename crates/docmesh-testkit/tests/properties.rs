//! Merge properties over random multi-writer histories.

use proptest::prelude::*;
use serde_json::json;

use docmesh::{EngineConfig, Entry, SyncEngine};
use docmesh_sync::{verify_convergence, ConvergenceResult};
use docmesh_testkit::generators::history_params;
use docmesh_testkit::{history_from_params, Cluster, History, HistoryParams, STRANGER_MARK};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn config() -> EngineConfig {
    EngineConfig::default().with_publish_on_write(false)
}

/// A reader engine attached to the history's log.
async fn attached(cluster: &Cluster, seed: u8, history: &History) -> SyncEngine {
    let engine = cluster.engine(seed, config()).await;
    engine.load(&history.log.address).await.unwrap();
    engine
}

async fn converged(a: &SyncEngine, b: &SyncEngine) -> bool {
    let (da, db) = (a.digest().await.unwrap(), b.digest().await.unwrap());
    matches!(verify_convergence(&da, &db), ConvergenceResult::Converged)
}

fn permute(entries: &[Entry], order: &[usize]) -> Vec<Entry> {
    order.iter().map(|&i| entries[i].clone()).collect()
}

fn history_with_order() -> impl Strategy<Value = (HistoryParams, Vec<usize>)> {
    any::<HistoryParams>().prop_flat_map(|params| {
        let order: Vec<usize> = (0..=params.steps.len()).collect();
        (Just(params), Just(order).prop_shuffle())
    })
}

/// Two independent branches of the same log.
fn branch_pair() -> impl Strategy<Value = (HistoryParams, HistoryParams)> {
    (1usize..=3).prop_flat_map(|writers| (history_params(writers), history_params(writers)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_delivery_order_does_not_matter((params, order) in history_with_order()) {
        runtime().block_on(async {
            let history = history_from_params(&params);
            let entries = history.entries();
            let cluster = Cluster::new();
            cluster.publish_genesis(&history.log).await;

            let ordered = attached(&cluster, 10, &history).await;
            let shuffled = attached(&cluster, 11, &history).await;
            ordered.merge(entries.clone()).await.unwrap();
            shuffled.merge(permute(&entries, &order)).await.unwrap();

            prop_assert!(converged(&ordered, &shuffled).await);
            prop_assert_eq!(ordered.view().await.unwrap(), shuffled.view().await.unwrap());
            Ok(())
        })?;
    }

    #[test]
    fn test_merge_is_idempotent(params: HistoryParams) {
        runtime().block_on(async {
            let history = history_from_params(&params);
            let cluster = Cluster::new();
            cluster.publish_genesis(&history.log).await;
            let engine = attached(&cluster, 10, &history).await;

            let first = engine.merge(history.entries()).await.unwrap();
            prop_assert_eq!(first.received, first.accepted + first.duplicates + first.dropped);
            let view = engine.view().await.unwrap();
            let count = engine.entry_count().await.unwrap();

            let again = engine.merge(history.entries()).await.unwrap();
            prop_assert_eq!(again.accepted, 0);
            prop_assert!(again.is_noop());
            prop_assert_eq!(engine.view().await.unwrap(), view);
            prop_assert_eq!(engine.entry_count().await.unwrap(), count);
            Ok(())
        })?;
    }

    #[test]
    fn test_merge_is_commutative((left, right) in branch_pair()) {
        runtime().block_on(async {
            let (h1, h2) = (history_from_params(&left), history_from_params(&right));
            prop_assert_eq!(&h1.log.address, &h2.log.address);
            let cluster = Cluster::new();
            cluster.publish_genesis(&h1.log).await;

            let a = attached(&cluster, 10, &h1).await;
            let b = attached(&cluster, 11, &h1).await;
            a.merge(h1.entries()).await.unwrap();
            a.merge(h2.entries()).await.unwrap();
            b.merge(h2.entries()).await.unwrap();
            b.merge(h1.entries()).await.unwrap();

            prop_assert!(converged(&a, &b).await);
            Ok(())
        })?;
    }

    #[test]
    fn test_rebuild_matches_incremental((params, order) in history_with_order()) {
        runtime().block_on(async {
            let history = history_from_params(&params);
            let cluster = Cluster::new();
            cluster.publish_genesis(&history.log).await;
            let engine = attached(&cluster, 10, &history).await;

            engine.merge(permute(&history.entries(), &order)).await.unwrap();
            let incremental = engine.view().await.unwrap();
            let rebuilt = engine.rebuild().await.unwrap();
            prop_assert_eq!(incremental, rebuilt);
            Ok(())
        })?;
    }

    #[test]
    fn test_unauthorized_writes_never_visible(params: HistoryParams) {
        runtime().block_on(async {
            let history = history_from_params(&params);
            let cluster = Cluster::new();
            cluster.publish_genesis(&history.log).await;
            let engine = attached(&cluster, 10, &history).await;

            let report = engine.merge(history.entries()).await.unwrap();
            let strangers = history
                .entries()
                .iter()
                .filter(|e| e.author() == &history.stranger.public_key())
                .count();
            prop_assert!(report.dropped >= strangers);

            let mark = json!(STRANGER_MARK);
            for (_, value) in engine.all_documents().await.unwrap() {
                prop_assert_ne!(&value, &mark);
            }
            for entry in engine.export().await.unwrap() {
                prop_assert_ne!(entry.author(), &history.stranger.public_key());
            }
            Ok(())
        })?;
    }

    #[test]
    fn test_chunked_delivery_then_full_merge_converges(
        (params, order) in history_with_order(),
        chunk in 1usize..5,
    ) {
        runtime().block_on(async {
            let history = history_from_params(&params);
            let entries = history.entries();
            let cluster = Cluster::new();
            cluster.publish_genesis(&history.log).await;

            let whole = attached(&cluster, 10, &history).await;
            let chunked = attached(&cluster, 11, &history).await;
            whole.merge(entries.clone()).await.unwrap();

            for part in permute(&entries, &order).chunks(chunk) {
                chunked.merge(part.to_vec()).await.unwrap();
            }
            chunked.merge(entries.clone()).await.unwrap();

            prop_assert!(converged(&whole, &chunked).await);
            Ok(())
        })?;
    }
}
