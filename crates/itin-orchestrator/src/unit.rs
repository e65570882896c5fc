use itin_core::{Storage, StorageError};
use itin_types::{Day, Itinerary, Node};

const MAX_CONFLICT_RETRIES: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("day {0} not found")]
    DayNotFound(u32),
    #[error("gave up after {0} optimistic-write conflicts")]
    ConflictRetriesExhausted(u32),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The per-unit write protocol from spec §4.4: read latest (version V),
/// apply the mutation, `DS.update` with `expectedVersion = V`. On
/// `Conflict` (another unit in the same phase persisted meanwhile),
/// re-read the new latest and re-apply rather than failing the unit.
async fn with_retry<F>(storage: &Storage, itinerary_id: &str, mut mutate: F) -> Result<Itinerary, UnitError>
where
    F: FnMut(&mut Itinerary) -> Result<(), UnitError>,
{
    for _ in 0..MAX_CONFLICT_RETRIES {
        let mut itinerary = storage
            .get(itinerary_id)
            .await
            .ok_or_else(|| UnitError::Storage(StorageError::NotFound(itinerary_id.to_string())))?;
        let expected_version = itinerary.version;
        mutate(&mut itinerary)?;
        itinerary.touch();

        match storage.update(itinerary.clone(), expected_version).await {
            Ok(()) => return Ok(itinerary),
            Err(StorageError::Conflict { .. }) => continue,
            Err(other) => return Err(other.into()),
        }
    }
    Err(UnitError::ConflictRetriesExhausted(MAX_CONFLICT_RETRIES))
}

/// Persists a planned/populated day. `mutate_day` receives the day at
/// its latest durable state on every retry, so concurrent per-day
/// workers (e.g. activities and meals running in the same phase) always
/// apply their change on top of the freshest base.
pub async fn persist_day<F>(storage: &Storage, itinerary_id: &str, day_number: u32, mutate_day: F) -> Result<(Itinerary, Day), UnitError>
where
    F: Fn(&mut Day),
{
    let itinerary = with_retry(storage, itinerary_id, |itinerary| {
        let day = itinerary
            .day_mut(day_number)
            .ok_or(UnitError::DayNotFound(day_number))?;
        mutate_day(day);
        day.sort_nodes_by_start_time();
        Ok(())
    })
    .await?;

    let day = itinerary
        .days
        .iter()
        .find(|d| d.day_number == day_number)
        .cloned()
        .ok_or(UnitError::DayNotFound(day_number))?;
    Ok((itinerary, day))
}

/// Persists a node change. Silently no-ops the mutation (spec §4.4 step
/// 3 / §8 invariant 6) if the node is `locked` or already has a
/// `bookingRef` — the caller is responsible for emitting a
/// `partial_failure` when this happens, since only it knows whether the
/// mutation would actually have changed anything observable.
pub async fn persist_node<F>(
    storage: &Storage,
    itinerary_id: &str,
    day_number: u32,
    node_id: &str,
    mutate_node: F,
) -> Result<(Itinerary, Node, bool), UnitError>
where
    F: Fn(&mut Node),
{
    let mut applied = false;
    let itinerary = with_retry(storage, itinerary_id, |itinerary| {
        let day = itinerary
            .day_mut(day_number)
            .ok_or(UnitError::DayNotFound(day_number))?;
        if let Some(node) = day.nodes.iter_mut().find(|n| n.id == node_id) {
            if !node.is_immutable() {
                mutate_node(node);
                applied = true;
            }
        }
        Ok(())
    })
    .await?;

    let node = itinerary
        .days
        .iter()
        .find(|d| d.day_number == day_number)
        .and_then(|d| d.nodes.iter().find(|n| n.id == node_id))
        .cloned()
        .ok_or(UnitError::DayNotFound(day_number))?;
    Ok((itinerary, node, applied))
}

/// One node's pending change within a batched persist (spec Open
/// Questions: enrichment batches several nodes' changes into one
/// `DS.update`/version bump instead of one per node).
pub type NodeMutation = (u32, String, Box<dyn Fn(&mut Node) + Send + Sync>);

/// Applies every mutation in `mutations` within a single optimistic-write
/// pass, so a batch of enriched nodes bumps the itinerary version exactly
/// once. Per-node locking rules are unchanged from `persist_node`: a
/// `locked`/booked node is silently skipped rather than failing the rest
/// of the batch.
pub async fn persist_nodes_batch(
    storage: &Storage,
    itinerary_id: &str,
    mutations: &[NodeMutation],
) -> Result<(Itinerary, Vec<(u32, String, Node, bool)>), UnitError> {
    let mut applied = vec![false; mutations.len()];
    let itinerary = with_retry(storage, itinerary_id, |itinerary| {
        applied.iter_mut().for_each(|a| *a = false);
        for (i, (day_number, node_id, mutate_node)) in mutations.iter().enumerate() {
            let day = itinerary
                .day_mut(*day_number)
                .ok_or(UnitError::DayNotFound(*day_number))?;
            if let Some(node) = day.nodes.iter_mut().find(|n| &n.id == node_id) {
                if !node.is_immutable() {
                    mutate_node(node);
                    applied[i] = true;
                }
            }
        }
        Ok(())
    })
    .await?;

    let results: Result<Vec<(u32, String, Node, bool)>, UnitError> = mutations
        .iter()
        .enumerate()
        .map(|(i, (day_number, node_id, _))| {
            let node = itinerary
                .days
                .iter()
                .find(|d| d.day_number == *day_number)
                .and_then(|d| d.nodes.iter().find(|n| &n.id == node_id))
                .cloned()
                .ok_or(UnitError::DayNotFound(*day_number))?;
            Ok((*day_number, node_id.clone(), node, applied[i]))
        })
        .collect();
    Ok((itinerary, results?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use itin_types::{NodeStatus, NodeType};
    use std::collections::HashMap;

    async fn seed() -> (tempfile::TempDir, Storage, String) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let id = "trip-1".to_string();
        let mut day = Day::placeholder(1, chrono::NaiveDate::from_ymd_opt(2025, 11, 1).unwrap());
        day.nodes.push(Node::placeholder("n1", NodeType::Attraction, "TBD"));
        let itinerary = Itinerary {
            itinerary_id: id.clone(),
            version: 1,
            user_id: "u".into(),
            summary: None,
            currency: "USD".into(),
            themes: vec![],
            origin: "A".into(),
            destination: "B".into(),
            start_date: day.date,
            end_date: day.date,
            days: vec![day],
            settings: Default::default(),
            agents: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        storage.create(itinerary).await.unwrap();
        (dir, storage, id)
    }

    #[tokio::test]
    async fn persist_day_bumps_version() {
        let (_dir, storage, id) = seed().await;
        let (itinerary, day) = persist_day(&storage, &id, 1, |d| d.location = Some("Gothic Quarter".into()))
            .await
            .unwrap();
        assert_eq!(itinerary.version, 2);
        assert_eq!(day.location.as_deref(), Some("Gothic Quarter"));
    }

    #[tokio::test]
    async fn persist_node_skips_locked_node() {
        let (_dir, storage, id) = seed().await;
        {
            let (_itinerary, _day) = persist_day(&storage, &id, 1, |d| {
                d.nodes[0].locked = true;
            })
            .await
            .unwrap();
        }
        let (_itinerary, node, applied) = persist_node(&storage, &id, 1, "n1", |n| {
            n.status = NodeStatus::Enhanced;
        })
        .await
        .unwrap();
        assert!(!applied);
        assert_eq!(node.status, NodeStatus::Placeholder);
    }

    #[tokio::test]
    async fn persist_node_applies_when_unlocked() {
        let (_dir, storage, id) = seed().await;
        let (_itinerary, node, applied) = persist_node(&storage, &id, 1, "n1", |n| {
            n.status = NodeStatus::Enhanced;
        })
        .await
        .unwrap();
        assert!(applied);
        assert_eq!(node.status, NodeStatus::Enhanced);
    }

    #[tokio::test]
    async fn persist_nodes_batch_bumps_version_once() {
        let (_dir, storage, id) = seed().await;
        persist_day(&storage, &id, 1, |d| {
            d.nodes.push(Node::placeholder("n2", NodeType::Meal, "TBD"));
        })
        .await
        .unwrap();

        let mutations: Vec<NodeMutation> = vec![
            (1, "n1".to_string(), Box::new(|n: &mut Node| n.status = NodeStatus::Enhanced)),
            (1, "n2".to_string(), Box::new(|n: &mut Node| n.status = NodeStatus::Enhanced)),
        ];
        let before = storage.get(&id).await.unwrap().version;
        let (itinerary, results) = persist_nodes_batch(&storage, &id, &mutations).await.unwrap();

        assert_eq!(itinerary.version, before + 1);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, _, node, applied)| *applied && node.status == NodeStatus::Enhanced));
    }

    #[tokio::test]
    async fn persist_nodes_batch_skips_locked_node_without_failing_batch() {
        let (_dir, storage, id) = seed().await;
        persist_day(&storage, &id, 1, |d| {
            d.nodes.push(Node::placeholder("n2", NodeType::Meal, "TBD"));
            d.nodes[1].locked = true;
        })
        .await
        .unwrap();

        let mutations: Vec<NodeMutation> = vec![
            (1, "n1".to_string(), Box::new(|n: &mut Node| n.status = NodeStatus::Enhanced)),
            (1, "n2".to_string(), Box::new(|n: &mut Node| n.status = NodeStatus::Enhanced)),
        ];
        let (_itinerary, results) = persist_nodes_batch(&storage, &id, &mutations).await.unwrap();

        let n1 = results.iter().find(|(_, id, _, _)| id == "n1").unwrap();
        let n2 = results.iter().find(|(_, id, _, _)| id == "n2").unwrap();
        assert!(n1.3);
        assert!(!n2.3);
        assert_eq!(n2.2.status, NodeStatus::Placeholder);
    }
}
