//! Integration tests for the broker: enrollment, round robin, routing, reclamation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use courtier::config::BrokerConfig;
use courtier::model::ChannelId;
use courtier::{Broker, ChannelPair, Error, WorkItem};

const WAIT: Duration = Duration::from_secs(2);

fn test_broker() -> Arc<Broker> {
    Broker::new(BrokerConfig {
        queue_capacity: 32,
        local_workers: 2,
        consumer_poll_ms: 20,
        ..BrokerConfig::default()
    })
}

fn item(payload: &str) -> WorkItem {
    WorkItem::new(payload.as_bytes())
}

async fn get(broker: &Broker) -> (WorkItem, ChannelId) {
    tokio::time::timeout(WAIT, broker.get())
        .await
        .expect("get should not hang")
}

// ---------------------------------------------------------------------------
// Enrollment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enroll_assigns_sequential_ids() {
    let broker = test_broker();
    let a = broker.channel();
    let b = broker.channel();

    let id_a = broker.enroll(&a).unwrap();
    let id_b = broker.enroll(&b).unwrap();

    assert_eq!(id_a, ChannelId(0));
    assert_eq!(id_b, ChannelId(1));
    assert_eq!(a.id(), Some(id_a));
    assert_eq!(b.id(), Some(id_b));
    assert_eq!(broker.channel_count(), 2);
}

#[tokio::test]
async fn enrolling_twice_is_an_error() {
    let broker = test_broker();
    let a = broker.channel();
    let id = broker.enroll(&a).unwrap();

    match broker.enroll(&a) {
        Err(Error::AlreadyEnrolled(existing)) => assert_eq!(existing, id),
        other => panic!("expected AlreadyEnrolled, got {other:?}"),
    }
    assert_eq!(broker.channel_count(), 1);
}

#[tokio::test]
async fn channel_ids_wrap_at_ceiling() {
    let broker = Broker::new(BrokerConfig {
        max_channel_id: 2,
        ..BrokerConfig::default()
    });
    let channels: Vec<ChannelPair> = (0..3).map(|_| broker.channel()).collect();
    let ids: Vec<ChannelId> = channels.iter().map(|c| broker.enroll(c).unwrap()).collect();

    assert_eq!(ids, vec![ChannelId(0), ChannelId(1), ChannelId(0)]);
}

#[tokio::test]
async fn get_waits_for_first_enrollment() {
    let broker = test_broker();

    let getter = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move { broker.get().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!getter.is_finished(), "get should wait for a channel");

    let channel = broker.channel();
    let id = broker.enroll(&channel).unwrap();
    channel.submit(item("first")).await.unwrap();

    let (got, from) = tokio::time::timeout(WAIT, getter).await.unwrap().unwrap();
    assert_eq!(got.payload, b"first");
    assert_eq!(from, id);
}

// ---------------------------------------------------------------------------
// Round robin
// ---------------------------------------------------------------------------

#[tokio::test]
async fn round_robin_visits_each_channel_equally() {
    const CHANNELS: usize = 3;
    const ROUNDS: usize = 4;

    let broker = test_broker();
    let channels: Vec<ChannelPair> = (0..CHANNELS).map(|_| broker.channel()).collect();
    let mut order = Vec::new();
    for channel in &channels {
        order.push(broker.enroll(channel).unwrap());
        for r in 0..ROUNDS {
            channel.submit(item(&format!("r{r}"))).await.unwrap();
        }
    }

    let mut visits: HashMap<ChannelId, usize> = HashMap::new();
    let mut sequence = Vec::new();
    for _ in 0..CHANNELS * ROUNDS {
        let (_, id) = get(&broker).await;
        *visits.entry(id).or_default() += 1;
        sequence.push(id);
    }

    for id in &order {
        assert_eq!(visits[id], ROUNDS, "channel {id} visited unevenly");
    }
    // Strict rotation in enrollment order.
    let expected: Vec<ChannelId> = order.iter().copied().cycle().take(CHANNELS * ROUNDS).collect();
    assert_eq!(sequence, expected);
}

#[tokio::test]
async fn items_within_a_channel_come_out_fifo() {
    let broker = test_broker();
    let channel = broker.channel();
    broker.enroll(&channel).unwrap();

    for i in 0..10 {
        channel.submit(item(&i.to_string())).await.unwrap();
    }
    for i in 0..10 {
        let (got, _) = get(&broker).await;
        assert_eq!(got.payload, i.to_string().as_bytes());
    }
}

#[tokio::test]
async fn enrollment_restarts_rotation_at_first_channel() {
    let broker = test_broker();
    let a = broker.channel();
    let b = broker.channel();
    let id_a = broker.enroll(&a).unwrap();
    let id_b = broker.enroll(&b).unwrap();
    for _ in 0..3 {
        a.submit(item("a")).await.unwrap();
        b.submit(item("b")).await.unwrap();
    }

    assert_eq!(get(&broker).await.1, id_a);
    // Cursor now points at b, but a new enrollment sends it back to a.
    let c = broker.channel();
    broker.enroll(&c).unwrap();
    assert_eq!(get(&broker).await.1, id_a);
    assert_eq!(get(&broker).await.1, id_b);
}

#[tokio::test(start_paused = true)]
async fn get_timeout_gives_up_on_idle_channel() {
    let broker = test_broker();
    let channel = broker.channel();
    broker.enroll(&channel).unwrap();

    let started = tokio::time::Instant::now();
    let got = broker.get_timeout(Duration::from_secs(60)).await;
    assert!(got.is_none());
    assert!(started.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn collect_returns_what_arrived_by_the_deadline() {
    let broker = test_broker();
    let channel = broker.channel();
    let id = broker.enroll(&channel).unwrap();
    for fitness in [1.0, 2.0] {
        let mut result = item("done");
        result.set_fitness(fitness);
        assert!(broker.put(id, result).await);
    }

    let started = tokio::time::Instant::now();
    let results = channel.collect(5, Duration::from_secs(30)).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].fitness, 1.0);
    assert!(started.elapsed() >= Duration::from_secs(30));
}

// ---------------------------------------------------------------------------
// Result routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn put_routes_result_to_its_channel_unchanged() {
    let broker = test_broker();
    let a = broker.channel();
    let b = broker.channel();
    broker.enroll(&a).unwrap();
    let id_b = broker.enroll(&b).unwrap();

    let mut result = item("evaluated");
    result.set_fitness(3.5);
    assert!(broker.put(id_b, result).await);

    let back = tokio::time::timeout(WAIT, b.next()).await.unwrap().unwrap();
    assert_eq!(back.payload, b"evaluated");
    assert_eq!(back.fitness, 3.5);
    assert!(!back.dirty);
    assert!(b.try_next().is_none(), "no duplicate delivery");
    assert!(a.try_next().is_none(), "other channel untouched");
}

#[tokio::test]
async fn put_to_unknown_channel_is_discarded_without_blocking() {
    let broker = test_broker();
    let a = broker.channel();
    broker.enroll(&a).unwrap();

    let delivered = tokio::time::timeout(Duration::from_millis(200), broker.put(ChannelId(999), item("x")))
        .await
        .expect("put to unknown id must not block");
    assert!(!delivered);
    assert_eq!(a.ready(), 0);
}

#[tokio::test]
async fn put_waits_for_first_enrollment() {
    let broker = test_broker();

    let putter = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move { broker.put(ChannelId(0), WorkItem::new("early")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!putter.is_finished(), "put should wait for the first channel");

    let channel = broker.channel();
    broker.enroll(&channel).unwrap();
    assert!(tokio::time::timeout(WAIT, putter).await.unwrap().unwrap());
    assert_eq!(channel.try_next().unwrap().payload, b"early");
}

// ---------------------------------------------------------------------------
// Retired channels
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dropped_channel_is_reclaimed_on_next_enrollment() {
    let broker = test_broker();
    let a = broker.channel();
    let id_a = broker.enroll(&a).unwrap();
    drop(a);
    assert_eq!(broker.channel_count(), 1, "reclamation is lazy");

    let b = broker.channel();
    let id_b = broker.enroll(&b).unwrap();
    assert_eq!(broker.channel_count(), 1);
    assert_eq!(broker.channel_ids(), (vec![id_b], vec![id_b]));

    let delivered = tokio::time::timeout(Duration::from_millis(200), broker.put(id_a, item("late")))
        .await
        .expect("put to reclaimed channel must not block");
    assert!(!delivered);
    assert_eq!(b.ready(), 0);
}

#[tokio::test]
async fn result_for_dropped_channel_is_discarded_before_reclamation() {
    let broker = test_broker();
    let a = broker.channel();
    let id_a = broker.enroll(&a).unwrap();
    drop(a);

    assert!(!broker.put(id_a, item("late")).await);
}

#[tokio::test]
async fn get_skips_drained_channel_of_departed_producer() {
    let broker = test_broker();
    let a = broker.channel();
    let b = broker.channel();
    broker.enroll(&a).unwrap();
    let id_b = broker.enroll(&b).unwrap();
    b.submit(item("b")).await.unwrap();
    drop(a);

    let (got, id) = get(&broker).await;
    assert_eq!(id, id_b);
    assert_eq!(got.payload, b"b");
}

#[tokio::test]
async fn waiting_get_moves_on_when_its_producer_leaves() {
    let broker = test_broker();
    let a = broker.channel();
    broker.enroll(&a).unwrap();

    // Parks on a's empty raw queue.
    let getter = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move { broker.get().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let b = broker.channel();
    let id_b = broker.enroll(&b).unwrap();
    b.submit(item("b")).await.unwrap();
    drop(a);

    let (got, id) = tokio::time::timeout(WAIT, getter).await.unwrap().unwrap();
    assert_eq!(id, id_b);
    assert_eq!(got.payload, b"b");
}

#[tokio::test]
async fn leftover_items_of_departed_producer_are_still_served() {
    let broker = test_broker();
    let a = broker.channel();
    let id_a = broker.enroll(&a).unwrap();
    a.submit(item("orphan")).await.unwrap();
    drop(a);

    let (got, id) = get(&broker).await;
    assert_eq!(id, id_a);
    assert_eq!(got.payload, b"orphan");
    assert!(!broker.put(id, got).await);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn items_queued_before_enrollment_all_come_back() {
    const ITEMS: usize = 16;

    for _ in 0..20 {
        let broker = test_broker();
        let evaluator = |item: &mut WorkItem| -> courtier::Result<()> {
            item.set_fitness(1.0);
            Ok(())
        };
        broker.enroll_local_workers(4, Arc::new(evaluator));

        // Workers are already waiting when the full channel shows up.
        let channel = broker.channel();
        for i in 0..ITEMS {
            channel.submit(item(&i.to_string())).await.unwrap();
        }
        broker.enroll(&channel).unwrap();

        let results = channel.collect(ITEMS, Duration::from_secs(5)).await;
        assert_eq!(results.len(), ITEMS, "a result was discarded for a live channel");
        broker.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn churning_channels_keep_both_sides_in_step() {
    const TASKS: usize = 8;
    const ROUNDS: usize = 50;

    let broker = test_broker();
    let churners: Vec<_> = (0..TASKS)
        .map(|t| {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                let mut kept = Vec::new();
                for round in 0..ROUNDS {
                    let channel = broker.channel();
                    broker.enroll(&channel).unwrap();
                    if (t + round) % 3 == 0 {
                        kept.push(channel);
                    }
                    // Unkept channels drop at the end of the round, racing
                    // the other tasks' enrollments.
                    tokio::task::yield_now().await;
                }
                kept
            })
        })
        .collect();

    let watcher = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            for _ in 0..500 {
                let (raw, processed) = broker.channel_ids();
                assert_eq!(raw, processed);
                tokio::task::yield_now().await;
            }
        })
    };

    let mut kept = Vec::new();
    for churner in churners {
        kept.extend(churner.await.unwrap());
    }
    watcher.await.unwrap();

    // One more enrollment sweeps every dropped channel from both sides.
    let last = broker.channel();
    let last_id = broker.enroll(&last).unwrap();
    let (raw, processed) = broker.channel_ids();
    assert_eq!(raw, processed);

    let mut expected: Vec<ChannelId> = kept.iter().filter_map(|c| c.id()).collect();
    expected.push(last_id);
    expected.sort();
    assert_eq!(raw, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enrollment_and_dispatch_stay_consistent() {
    const PRODUCERS: usize = 8;
    const ITEMS: usize = 25;

    let broker = test_broker();
    let evaluator = |item: &mut WorkItem| -> courtier::Result<()> {
        item.set_fitness(item.payload.len() as f64);
        Ok(())
    };
    broker.enroll_local_workers(4, Arc::new(evaluator));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                let channel = broker.channel();
                broker.enroll(&channel).unwrap();
                let sent: HashSet<String> = (0..ITEMS).map(|i| format!("p{p}-{i}")).collect();
                for payload in &sent {
                    channel.submit(item(payload)).await.unwrap();
                }
                let results = channel.collect(ITEMS, Duration::from_secs(10)).await;
                let received: Vec<String> = results
                    .iter()
                    .map(|r| String::from_utf8(r.payload.clone()).unwrap())
                    .collect();
                (sent, received)
            })
        })
        .collect();

    for producer in producers {
        let (sent, received) = producer.await.unwrap();
        assert_eq!(received.len(), ITEMS, "every item comes back");
        let unique: HashSet<String> = received.into_iter().collect();
        assert_eq!(unique, sent, "no duplicates, no strays");
    }

    let (raw, processed) = broker.channel_ids();
    assert_eq!(raw, processed);

    broker.shutdown().await;
    assert_eq!(broker.consumer_count(), 0);
}
