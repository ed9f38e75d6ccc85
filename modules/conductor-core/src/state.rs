//! Runtime train state: the fast key/value side of the router.
//!
//! The authoritative route lives in the route store; everything here can be
//! rebuilt from it (and is, at startup and on reset). Keys follow the
//! `{train}-stations` / `{train}-route` / `{train}-status` layout, one value
//! per concern.
//!
//! The route is consumed from the head as the train travels. Handlers use a
//! peek/commit pair: `peek_next_station` computes the destination without
//! mutating anything, and `advance` performs the pop only after the registry
//! move has succeeded, so a failed move never loses a hop.

use async_trait::async_trait;
use redis::Script;

use crate::error::RouterError;
use crate::types::{Project, Route, RouteType, TrainStatus};

#[async_trait]
pub trait TrainStateStore: Send + Sync {
    async fn exists(&self, train_id: &str) -> Result<bool, RouterError>;

    /// Seed the runtime state for a train from its route: stations, the
    /// mutable remaining route, type, epoch counters, current station
    /// (`pht_incoming`) and status (`initialized`). Atomic, and a no-op when
    /// the train is already registered.
    async fn register(&self, route: &Route) -> Result<(), RouterError>;

    async fn status(&self, train_id: &str) -> Result<TrainStatus, RouterError>;

    async fn set_status(&self, train_id: &str, status: TrainStatus) -> Result<(), RouterError>;

    async fn route_type(&self, train_id: &str) -> Result<RouteType, RouterError>;

    async fn current_station(&self, train_id: &str) -> Result<Project, RouterError>;

    async fn set_current_station(
        &self,
        train_id: &str,
        project: &Project,
    ) -> Result<(), RouterError>;

    /// The station the train would travel to next, without consuming it.
    /// `Outgoing` when the route is exhausted (and, for periodic trains, all
    /// epochs are done).
    async fn peek_next_station(&self, train_id: &str) -> Result<Project, RouterError>;

    /// Consume the next station from the route. For periodic trains an
    /// exhausted route rolls into the next epoch: the counter is incremented
    /// and the route re-seeded from the station list before popping. Atomic
    /// with respect to concurrent callers for the same train.
    async fn advance(&self, train_id: &str) -> Result<Project, RouterError>;

    /// Completed full passes for a periodic train; `None` for linear trains.
    async fn epoch(&self, train_id: &str) -> Result<Option<u32>, RouterError>;

    async fn remove(&self, train_id: &str) -> Result<(), RouterError>;
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Atomic seeding. KEYS: stations, route, type, status, current, epoch,
/// epochs. ARGV[1] = route type, ARGV[2] = epochs ('' for linear),
/// ARGV[3..] = stations in order. Returns 1 when seeded, 0 when the train
/// was already registered.
const REGISTER_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
for i = 3, #ARGV do
  redis.call('RPUSH', KEYS[1], ARGV[i])
  redis.call('RPUSH', KEYS[2], ARGV[i])
end
redis.call('SET', KEYS[3], ARGV[1])
redis.call('SET', KEYS[4], 'initialized')
redis.call('SET', KEYS[5], 'pht_incoming')
if ARGV[2] ~= '' then
  redis.call('SET', KEYS[6], 0)
  redis.call('SET', KEYS[7], ARGV[2])
end
return 1
"#;

/// Read-only lookahead. KEYS: route, type, epoch, epochs, stations.
/// Returns the next station token, 'pht_outgoing' when the journey is over,
/// or nil when the train is not registered.
const PEEK_SCRIPT: &str = r#"
local head = redis.call('LINDEX', KEYS[1], 0)
if head then
  return head
end
local rtype = redis.call('GET', KEYS[2])
if not rtype then
  return nil
end
if rtype == 'linear' then
  return 'pht_outgoing'
end
local epoch = tonumber(redis.call('GET', KEYS[3]))
local epochs = tonumber(redis.call('GET', KEYS[4]))
if epoch >= epochs then
  return 'pht_outgoing'
end
return redis.call('LINDEX', KEYS[5], 0)
"#;

/// The mutating pop. Same KEYS as PEEK_SCRIPT. Rolls a periodic train into
/// its next epoch when the route is exhausted and epochs remain.
const ADVANCE_SCRIPT: &str = r#"
local head = redis.call('LPOP', KEYS[1])
if head then
  return head
end
local rtype = redis.call('GET', KEYS[2])
if not rtype then
  return nil
end
if rtype == 'linear' then
  return 'pht_outgoing'
end
local epoch = tonumber(redis.call('GET', KEYS[3]))
local epochs = tonumber(redis.call('GET', KEYS[4]))
if epoch >= epochs then
  return 'pht_outgoing'
end
redis.call('SET', KEYS[3], epoch + 1)
local stations = redis.call('LRANGE', KEYS[5], 0, -1)
for i = 1, #stations do
  redis.call('RPUSH', KEYS[1], stations[i])
end
return redis.call('LPOP', KEYS[1])
"#;

/// Train state backed by Redis. All multi-key operations run as server-side
/// scripts so they are atomic against the store.
pub struct RedisStateStore {
    con: redis::aio::MultiplexedConnection,
    register: Script,
    peek: Script,
    advance: Script,
}

impl RedisStateStore {
    pub async fn connect(host: &str) -> Result<Self, RouterError> {
        let client = redis::Client::open(format!("redis://{host}/"))?;
        let con = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(con))
    }

    pub fn new(con: redis::aio::MultiplexedConnection) -> Self {
        Self {
            con,
            register: Script::new(REGISTER_SCRIPT),
            peek: Script::new(PEEK_SCRIPT),
            advance: Script::new(ADVANCE_SCRIPT),
        }
    }

    fn key(train_id: &str, suffix: &str) -> String {
        format!("{train_id}-{suffix}")
    }

    async fn get_required(&self, train_id: &str, suffix: &str) -> Result<String, RouterError> {
        let mut con = self.con.clone();
        let value: Option<String> = redis::AsyncCommands::get(&mut con, Self::key(train_id, suffix))
            .await?;
        value.ok_or(RouterError::NotFound)
    }

    fn route_keys(train_id: &str) -> Vec<String> {
        vec![
            Self::key(train_id, "route"),
            Self::key(train_id, "type"),
            Self::key(train_id, "epoch"),
            Self::key(train_id, "epochs"),
            Self::key(train_id, "stations"),
        ]
    }
}

#[async_trait]
impl TrainStateStore for RedisStateStore {
    async fn exists(&self, train_id: &str) -> Result<bool, RouterError> {
        let mut con = self.con.clone();
        let exists: bool =
            redis::AsyncCommands::exists(&mut con, Self::key(train_id, "stations")).await?;
        Ok(exists)
    }

    async fn register(&self, route: &Route) -> Result<(), RouterError> {
        route.validate()?;

        let train_id = &route.repository_suffix;
        let mut invocation = self.register.prepare_invoke();
        invocation
            .key(Self::key(train_id, "stations"))
            .key(Self::key(train_id, "route"))
            .key(Self::key(train_id, "type"))
            .key(Self::key(train_id, "status"))
            .key(Self::key(train_id, "current-station"))
            .key(Self::key(train_id, "epoch"))
            .key(Self::key(train_id, "epochs"))
            .arg(route.route_type().as_str())
            .arg(route.epochs.map(|e| e.to_string()).unwrap_or_default());
        for station in &route.stations {
            invocation.arg(station.as_str());
        }

        let mut con = self.con.clone();
        let seeded: i64 = invocation.invoke_async(&mut con).await?;
        if seeded == 0 {
            tracing::info!(train_id, "Train already registered, skipping");
        }
        Ok(())
    }

    async fn status(&self, train_id: &str) -> Result<TrainStatus, RouterError> {
        TrainStatus::parse(&self.get_required(train_id, "status").await?)
    }

    async fn set_status(&self, train_id: &str, status: TrainStatus) -> Result<(), RouterError> {
        let mut con = self.con.clone();
        let _: () = redis::AsyncCommands::set(
            &mut con,
            Self::key(train_id, "status"),
            status.as_str(),
        )
        .await?;
        Ok(())
    }

    async fn route_type(&self, train_id: &str) -> Result<RouteType, RouterError> {
        RouteType::parse(&self.get_required(train_id, "type").await?)
    }

    async fn current_station(&self, train_id: &str) -> Result<Project, RouterError> {
        Ok(Project::from_token(
            &self.get_required(train_id, "current-station").await?,
        ))
    }

    async fn set_current_station(
        &self,
        train_id: &str,
        project: &Project,
    ) -> Result<(), RouterError> {
        let mut con = self.con.clone();
        let _: () = redis::AsyncCommands::set(
            &mut con,
            Self::key(train_id, "current-station"),
            project.token(),
        )
        .await?;
        Ok(())
    }

    async fn peek_next_station(&self, train_id: &str) -> Result<Project, RouterError> {
        let mut invocation = self.peek.prepare_invoke();
        for key in Self::route_keys(train_id) {
            invocation.key(key);
        }
        let mut con = self.con.clone();
        let next: Option<String> = invocation.invoke_async(&mut con).await?;
        next.map(|t| Project::from_token(&t)).ok_or(RouterError::NotFound)
    }

    async fn advance(&self, train_id: &str) -> Result<Project, RouterError> {
        let mut invocation = self.advance.prepare_invoke();
        for key in Self::route_keys(train_id) {
            invocation.key(key);
        }
        let mut con = self.con.clone();
        let next: Option<String> = invocation.invoke_async(&mut con).await?;
        next.map(|t| Project::from_token(&t)).ok_or(RouterError::NotFound)
    }

    async fn epoch(&self, train_id: &str) -> Result<Option<u32>, RouterError> {
        let mut con = self.con.clone();
        let value: Option<String> =
            redis::AsyncCommands::get(&mut con, Self::key(train_id, "epoch")).await?;
        match value {
            None => Ok(None),
            Some(raw) => raw.parse::<u32>().map(Some).map_err(|_| {
                RouterError::StoreUnavailable(format!("corrupt epoch counter: {raw}"))
            }),
        }
    }

    async fn remove(&self, train_id: &str) -> Result<(), RouterError> {
        let keys: Vec<String> = [
            "stations",
            "route",
            "type",
            "status",
            "current-station",
            "epoch",
            "epochs",
        ]
        .iter()
        .map(|s| Self::key(train_id, s))
        .collect();
        let mut con = self.con.clone();
        let _: () = redis::AsyncCommands::del(&mut con, keys).await?;
        tracing::info!(train_id, "Removed train from state store");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests)
// ---------------------------------------------------------------------------

/// In-memory state store mirroring the Redis layout and script semantics.
/// A single mutex over the whole map gives the same atomicity the scripts do.
#[cfg(any(test, feature = "test-utils"))]
pub struct MemoryStateStore {
    trains: std::sync::Mutex<std::collections::HashMap<String, TrainEntry>>,
}

#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone)]
struct TrainEntry {
    stations: Vec<String>,
    route: std::collections::VecDeque<String>,
    route_type: RouteType,
    status: TrainStatus,
    current_station: String,
    epoch: Option<u32>,
    epochs: Option<u32>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            trains: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Remaining stations on the mutable route, oldest first.
    pub fn remaining_route(&self, train_id: &str) -> Vec<String> {
        self.trains
            .lock()
            .unwrap()
            .get(train_id)
            .map(|e| e.route.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn next_from_entry(entry: &mut TrainEntry, consume: bool) -> Project {
        if let Some(head) = entry.route.front().cloned() {
            if consume {
                entry.route.pop_front();
            }
            return Project::from_token(&head);
        }
        if entry.route_type == RouteType::Linear {
            return Project::Outgoing;
        }
        let epoch = entry.epoch.unwrap_or(0);
        let epochs = entry.epochs.unwrap_or(0);
        if epoch >= epochs {
            return Project::Outgoing;
        }
        if consume {
            entry.epoch = Some(epoch + 1);
            entry.route = entry.stations.iter().cloned().collect();
            let head = entry.route.pop_front().expect("stations are non-empty");
            Project::from_token(&head)
        } else {
            Project::from_token(&entry.stations[0])
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl TrainStateStore for MemoryStateStore {
    async fn exists(&self, train_id: &str) -> Result<bool, RouterError> {
        Ok(self.trains.lock().unwrap().contains_key(train_id))
    }

    async fn register(&self, route: &Route) -> Result<(), RouterError> {
        route.validate()?;
        let mut trains = self.trains.lock().unwrap();
        if trains.contains_key(&route.repository_suffix) {
            return Ok(());
        }
        trains.insert(
            route.repository_suffix.clone(),
            TrainEntry {
                stations: route.stations.clone(),
                route: route.stations.iter().cloned().collect(),
                route_type: route.route_type(),
                status: TrainStatus::Initialized,
                current_station: Project::Incoming.token(),
                epoch: route.periodic.then_some(0),
                epochs: route.epochs,
            },
        );
        Ok(())
    }

    async fn status(&self, train_id: &str) -> Result<TrainStatus, RouterError> {
        self.trains
            .lock()
            .unwrap()
            .get(train_id)
            .map(|e| e.status)
            .ok_or(RouterError::NotFound)
    }

    async fn set_status(&self, train_id: &str, status: TrainStatus) -> Result<(), RouterError> {
        let mut trains = self.trains.lock().unwrap();
        let entry = trains.get_mut(train_id).ok_or(RouterError::NotFound)?;
        entry.status = status;
        Ok(())
    }

    async fn route_type(&self, train_id: &str) -> Result<RouteType, RouterError> {
        self.trains
            .lock()
            .unwrap()
            .get(train_id)
            .map(|e| e.route_type)
            .ok_or(RouterError::NotFound)
    }

    async fn current_station(&self, train_id: &str) -> Result<Project, RouterError> {
        self.trains
            .lock()
            .unwrap()
            .get(train_id)
            .map(|e| Project::from_token(&e.current_station))
            .ok_or(RouterError::NotFound)
    }

    async fn set_current_station(
        &self,
        train_id: &str,
        project: &Project,
    ) -> Result<(), RouterError> {
        let mut trains = self.trains.lock().unwrap();
        let entry = trains.get_mut(train_id).ok_or(RouterError::NotFound)?;
        entry.current_station = project.token();
        Ok(())
    }

    async fn peek_next_station(&self, train_id: &str) -> Result<Project, RouterError> {
        let mut trains = self.trains.lock().unwrap();
        let entry = trains.get_mut(train_id).ok_or(RouterError::NotFound)?;
        Ok(Self::next_from_entry(entry, false))
    }

    async fn advance(&self, train_id: &str) -> Result<Project, RouterError> {
        let mut trains = self.trains.lock().unwrap();
        let entry = trains.get_mut(train_id).ok_or(RouterError::NotFound)?;
        Ok(Self::next_from_entry(entry, true))
    }

    async fn epoch(&self, train_id: &str) -> Result<Option<u32>, RouterError> {
        self.trains
            .lock()
            .unwrap()
            .get(train_id)
            .map(|e| e.epoch)
            .ok_or(RouterError::NotFound)
    }

    async fn remove(&self, train_id: &str) -> Result<(), RouterError> {
        self.trains.lock().unwrap().remove(train_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(id: &str, stations: &[&str]) -> Route {
        Route {
            repository_suffix: id.into(),
            stations: stations.iter().map(|s| s.to_string()).collect(),
            periodic: false,
            epochs: None,
        }
    }

    fn periodic(id: &str, stations: &[&str], epochs: u32) -> Route {
        Route {
            repository_suffix: id.into(),
            stations: stations.iter().map(|s| s.to_string()).collect(),
            periodic: true,
            epochs: Some(epochs),
        }
    }

    #[tokio::test]
    async fn register_seeds_initialized_at_incoming() {
        let store = MemoryStateStore::new();
        store.register(&linear("t1", &["a", "b"])).await.unwrap();

        assert!(store.exists("t1").await.unwrap());
        assert_eq!(store.status("t1").await.unwrap(), TrainStatus::Initialized);
        assert_eq!(store.current_station("t1").await.unwrap(), Project::Incoming);
        assert_eq!(store.route_type("t1").await.unwrap(), RouteType::Linear);
    }

    #[tokio::test]
    async fn register_twice_is_a_no_op() {
        let store = MemoryStateStore::new();
        store.register(&linear("t1", &["a", "b"])).await.unwrap();
        store.advance("t1").await.unwrap();

        // Second registration must not reset the consumed route.
        store.register(&linear("t1", &["a", "b"])).await.unwrap();
        assert_eq!(store.remaining_route("t1"), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn linear_route_is_consumed_then_outgoing() {
        let store = MemoryStateStore::new();
        store.register(&linear("t1", &["a", "b"])).await.unwrap();

        assert_eq!(store.advance("t1").await.unwrap(), Project::Station("a".into()));
        assert_eq!(store.advance("t1").await.unwrap(), Project::Station("b".into()));
        assert_eq!(store.advance("t1").await.unwrap(), Project::Outgoing);
        // Exhausted routes keep answering outgoing.
        assert_eq!(store.advance("t1").await.unwrap(), Project::Outgoing);
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let store = MemoryStateStore::new();
        store.register(&linear("t1", &["a", "b"])).await.unwrap();

        assert_eq!(store.peek_next_station("t1").await.unwrap(), Project::Station("a".into()));
        assert_eq!(store.peek_next_station("t1").await.unwrap(), Project::Station("a".into()));
        assert_eq!(store.advance("t1").await.unwrap(), Project::Station("a".into()));
        assert_eq!(store.peek_next_station("t1").await.unwrap(), Project::Station("b".into()));
    }

    #[tokio::test]
    async fn periodic_route_loops_through_epochs() {
        let store = MemoryStateStore::new();
        store.register(&periodic("t2", &["x", "y"], 2)).await.unwrap();

        let mut visited = Vec::new();
        let mut epochs_seen = Vec::new();
        loop {
            let next = store.advance("t2").await.unwrap();
            if next == Project::Outgoing {
                break;
            }
            epochs_seen.push(store.epoch("t2").await.unwrap().unwrap());
            visited.push(next.token());
        }

        assert_eq!(visited, vec!["x", "y", "x", "y", "x", "y"]);
        assert_eq!(epochs_seen, vec![0, 0, 1, 1, 2, 2]);
    }

    #[tokio::test]
    async fn peek_sees_epoch_rollover_without_committing() {
        let store = MemoryStateStore::new();
        store.register(&periodic("t2", &["x", "y"], 1)).await.unwrap();
        store.advance("t2").await.unwrap();
        store.advance("t2").await.unwrap();

        // Route exhausted, one epoch left: peek must announce the rollover
        // target without incrementing the counter.
        assert_eq!(store.peek_next_station("t2").await.unwrap(), Project::Station("x".into()));
        assert_eq!(store.epoch("t2").await.unwrap(), Some(0));

        assert_eq!(store.advance("t2").await.unwrap(), Project::Station("x".into()));
        assert_eq!(store.epoch("t2").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn missing_train_is_not_found() {
        let store = MemoryStateStore::new();
        assert!(matches!(
            store.status("ghost").await,
            Err(RouterError::NotFound)
        ));
        assert!(matches!(
            store.peek_next_station("ghost").await,
            Err(RouterError::NotFound)
        ));
    }

    #[tokio::test]
    async fn remove_clears_all_state() {
        let store = MemoryStateStore::new();
        store.register(&linear("t1", &["a"])).await.unwrap();
        store.remove("t1").await.unwrap();
        assert!(!store.exists("t1").await.unwrap());
    }
}
