//! The routing engine: a finite-state controller over the route catalog,
//! the runtime state store, and the registry mover.
//!
//! `process` is total — every command produces exactly one response, and no
//! error crosses into the bus layer. Commands for the same train arrive
//! strictly ordered (one message in flight per queue), which is what makes
//! the read-move-commit sequences in the handlers safe without locks.

use std::sync::Arc;

use crate::demo::DemoRunner;
use crate::error::RouterError;
use crate::messages::{ErrorCode, ResponseEvent, RouterCommand, RouterResponse};
use crate::mover::RegistryMover;
use crate::routes::RouteStore;
use crate::state::TrainStateStore;
use crate::types::{Project, TrainStatus};

pub struct TrainRouter {
    routes: Arc<dyn RouteStore>,
    state: Arc<dyn TrainStateStore>,
    mover: RegistryMover,
    auto_start: bool,
    demo: Option<Arc<DemoRunner>>,
}

impl TrainRouter {
    pub fn new(
        routes: Arc<dyn RouteStore>,
        state: Arc<dyn TrainStateStore>,
        mover: RegistryMover,
        auto_start: bool,
        demo: Option<Arc<DemoRunner>>,
    ) -> Self {
        Self {
            routes,
            state,
            mover,
            auto_start,
            demo,
        }
    }

    /// Service one command and produce its response.
    pub async fn process(&self, command: &RouterCommand) -> RouterResponse {
        match command {
            RouterCommand::Built { train_id } => self.initialize_train(train_id).await,
            RouterCommand::Start { train_id } => self.start_train(train_id).await,
            RouterCommand::Stop { train_id } => self.stop_train(train_id).await,
            RouterCommand::Pushed {
                train_id,
                project,
                operator,
            } => {
                // Pushes performed by the router itself come back around as
                // system events; routing them again would loop forever.
                if operator == "system" {
                    tracing::info!(train_id, "Ignoring system push event");
                    RouterResponse::success(ResponseEvent::Ignored, train_id, "Ignored system event")
                } else {
                    self.route_train(train_id, project).await
                }
            }
            RouterCommand::Status { train_id } => self.read_train_status(train_id).await,
            RouterCommand::Reset { train_id } => self.reset_train(train_id).await,
            RouterCommand::Unknown {
                event_type,
                train_id,
            } => {
                tracing::error!(event_type, "Unrecognized event type");
                RouterResponse::failed(
                    train_id.as_deref(),
                    None,
                    format!("Unrecognized event type: {event_type}"),
                )
            }
        }
    }

    /// Seed the state store from the route catalog for every train that is
    /// missing there. Called once at boot; the catalog is the source of
    /// truth after a restart, but live state is never overwritten.
    pub async fn sync_routes(&self) -> anyhow::Result<()> {
        tracing::info!("Syncing state store with route catalog");
        let routes = self.routes.list().await?;
        if routes.is_empty() {
            tracing::info!("No routes found in catalog");
            return Ok(());
        }
        for route in routes {
            let train_id = route.repository_suffix.clone();
            if self.state.exists(&train_id).await? {
                tracing::info!(train_id, "Train already registered, skipping");
                continue;
            }
            match self.state.register(&route).await {
                Ok(()) => tracing::info!(train_id, "Registered train from catalog"),
                // One bad catalog entry must not block the rest of the sync.
                Err(RouterError::InvalidRoute(msg)) => {
                    tracing::warn!(train_id, error = %msg, "Skipping invalid route in catalog");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    /// BUILT: the build pipeline has pushed the image pair into
    /// `pht_incoming`; fetch the route and seed runtime state.
    async fn initialize_train(&self, train_id: &str) -> RouterResponse {
        tracing::info!(train_id, "Initializing train");
        if let Err(e) = self.register_from_catalog(train_id).await {
            return failure(train_id, e);
        }
        if self.auto_start {
            tracing::info!(train_id, "Auto-start enabled, starting train");
            return self.start_train(train_id).await;
        }
        RouterResponse::success(
            ResponseEvent::Built,
            train_id,
            "Successfully initialized train",
        )
    }

    /// START: move the train out of its current project to the next station
    /// on the route.
    async fn start_train(&self, train_id: &str) -> RouterResponse {
        tracing::info!(train_id, "Attempting to start train");

        match self.state.exists(train_id).await {
            Ok(true) => {}
            Ok(false) => {
                // The state store is ephemeral; the catalog can resurrect it.
                tracing::warn!(train_id, "Train not in state store, recovering from catalog");
                if let Err(e) = self.register_from_catalog(train_id).await {
                    tracing::error!(train_id, error = %e, "Failed to recover route from catalog");
                    return RouterResponse::failed(
                        Some(train_id),
                        Some(ErrorCode::NotFound),
                        "Failed to recover route from catalog",
                    );
                }
            }
            Err(e) => return failure(train_id, e),
        }

        let status = match self.state.status(train_id).await {
            Ok(s) => s,
            Err(e) => return failure(train_id, e),
        };
        match status {
            TrainStatus::Started | TrainStatus::Running => {
                tracing::error!(train_id, "Train is already started");
                return RouterResponse::failed(
                    Some(train_id),
                    Some(ErrorCode::AlreadyStarted),
                    "Train is already started",
                );
            }
            TrainStatus::Completed => {
                return RouterResponse::failed(
                    Some(train_id),
                    Some(ErrorCode::NotFound),
                    "Train has already completed its route",
                );
            }
            TrainStatus::Initialized | TrainStatus::Stopped => {}
        }

        match self.depart(train_id).await {
            Ok(destination) => {
                if let Err(e) = self.state.set_status(train_id, TrainStatus::Running).await {
                    return failure(train_id, e);
                }
                self.maybe_trigger_demo(train_id, &destination).await;
                tracing::info!(train_id, destination = %destination, "Train started");
                RouterResponse::success(
                    ResponseEvent::Started,
                    train_id,
                    "Train started successfully",
                )
            }
            Err(e) => failure(train_id, e),
        }
    }

    /// STOP: freeze a running train in place. The images stay where they
    /// are; push events are rejected until the next START.
    async fn stop_train(&self, train_id: &str) -> RouterResponse {
        tracing::info!(train_id, "Attempting to stop train");

        match self.state.exists(train_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!(train_id, "Train does not exist in state store");
                return RouterResponse::failed(
                    Some(train_id),
                    Some(ErrorCode::NotFound),
                    "Train not found",
                );
            }
            Err(e) => return failure(train_id, e),
        }

        let status = match self.state.status(train_id).await {
            Ok(s) => s,
            Err(e) => return failure(train_id, e),
        };
        match status {
            TrainStatus::Stopped => {
                tracing::error!(train_id, "Train is already stopped");
                RouterResponse::failed(
                    Some(train_id),
                    Some(ErrorCode::AlreadyStopped),
                    "Train is already stopped",
                )
            }
            TrainStatus::Initialized | TrainStatus::Completed => {
                tracing::error!(train_id, status = %status, "Train is not running");
                RouterResponse::failed(
                    Some(train_id),
                    Some(ErrorCode::NotStarted),
                    "Train is not running",
                )
            }
            TrainStatus::Started | TrainStatus::Running => {
                if let Err(e) = self.state.set_status(train_id, TrainStatus::Stopped).await {
                    return failure(train_id, e);
                }
                tracing::info!(train_id, "Train stopped");
                RouterResponse::success(
                    ResponseEvent::Stopped,
                    train_id,
                    "Train stopped successfully",
                )
            }
        }
    }

    /// PUSHED: a station finished executing and pushed `latest`; carry the
    /// train to the next station, or to `pht_outgoing` when the route is
    /// done.
    async fn route_train(&self, train_id: &str, reported_project: &str) -> RouterResponse {
        let status = match self.state.status(train_id).await {
            Ok(s) => s,
            Err(e) => return failure(train_id, e),
        };
        if !status.is_active() {
            tracing::error!(train_id, status = %status, "Push event for a train that is not running");
            return RouterResponse::failed(
                Some(train_id),
                Some(ErrorCode::NotRunning),
                "Train is not running",
            );
        }

        let origin = match self.state.current_station(train_id).await {
            Ok(p) => p,
            Err(e) => return failure(train_id, e),
        };
        // The webhook's project field is informational; the state store is
        // authoritative.
        if reported_project != origin.project_name() {
            tracing::debug!(
                train_id,
                reported = reported_project,
                current = %origin.project_name(),
                "Push event project differs from stored station"
            );
        }

        let destination = match self.state.peek_next_station(train_id).await {
            Ok(p) => p,
            Err(e) => return failure(train_id, e),
        };

        if destination == Project::Outgoing {
            tracing::info!(train_id, "Train finished its route, moving to outgoing");
            if let Err(e) = self
                .mover
                .move_train(train_id, &origin, &Project::Outgoing, true, true)
                .await
            {
                return failure(train_id, e);
            }
            if let Err(e) = self.commit_arrival(train_id, &Project::Outgoing).await {
                return failure(train_id, e);
            }
            if let Err(e) = self.state.set_status(train_id, TrainStatus::Completed).await {
                return failure(train_id, e);
            }
            // The catalog entry is only needed while the train is en route.
            match self.routes.delete(train_id).await {
                Ok(()) | Err(RouterError::NotFound) => {}
                Err(e) => {
                    tracing::warn!(train_id, error = %e, "Failed to delete route from catalog");
                }
            }
            return RouterResponse::success(
                ResponseEvent::Completed,
                train_id,
                "Train completed successfully",
            );
        }

        tracing::info!(
            train_id,
            origin = %origin,
            destination = %destination,
            "Moving train to next station"
        );
        if let Err(e) = self
            .mover
            .move_train(train_id, &origin, &destination, true, false)
            .await
        {
            return failure(train_id, e);
        }
        if let Err(e) = self.commit_arrival(train_id, &destination).await {
            return failure(train_id, e);
        }
        self.maybe_trigger_demo(train_id, &destination).await;
        RouterResponse::success(
            ResponseEvent::Moved,
            train_id,
            format!("Origin: {origin} - Destination: {destination}"),
        )
    }

    /// STATUS: report the stored lifecycle status.
    async fn read_train_status(&self, train_id: &str) -> RouterResponse {
        match self.state.status(train_id).await {
            Ok(status) => {
                RouterResponse::success(ResponseEvent::Status, train_id, status.as_str())
            }
            Err(e) => failure(train_id, e),
        }
    }

    /// RESET: gather the train back into `pht_incoming` wherever it is,
    /// restore the working image to the build output, and re-seed the
    /// runtime state from the catalog.
    async fn reset_train(&self, train_id: &str) -> RouterResponse {
        tracing::info!(train_id, "Resetting train");

        let route = match self.routes.get(train_id).await {
            Ok(r) => r,
            Err(e) => return failure(train_id, e),
        };

        let locations = match self.mover.locate(train_id).await {
            Ok(l) => l,
            Err(e) => return failure(train_id, e),
        };
        for project in &locations {
            if project.is_utility() {
                continue;
            }
            tracing::info!(train_id, project = %project, "Found train outside incoming, moving back");
            if let Err(e) = self
                .mover
                .move_train(train_id, project, &Project::Incoming, true, false)
                .await
            {
                return failure(train_id, e);
            }
        }

        if let Err(e) = self.mover.restore_latest(train_id).await {
            return failure(train_id, e);
        }

        let exists = match self.state.exists(train_id).await {
            Ok(b) => b,
            Err(e) => return failure(train_id, e),
        };
        if exists {
            if let Err(e) = self.state.remove(train_id).await {
                return failure(train_id, e);
            }
        }
        if let Err(e) = self.state.register(&route).await {
            return failure(train_id, e);
        }

        tracing::info!(train_id, "Train reset");
        RouterResponse::success(ResponseEvent::Built, train_id, "Train reset")
    }

    // -----------------------------------------------------------------------
    // Shared steps
    // -----------------------------------------------------------------------

    async fn register_from_catalog(&self, train_id: &str) -> Result<(), RouterError> {
        let route = self.routes.get(train_id).await?;
        self.state.register(&route).await
    }

    /// Peek the destination, perform the registry move, and only then commit
    /// the route pop and station change. A failed move leaves the route
    /// untouched, so no hop is ever lost.
    async fn depart(&self, train_id: &str) -> Result<Project, RouterError> {
        let origin = self.state.current_station(train_id).await?;
        let destination = self.state.peek_next_station(train_id).await?;
        self.mover
            .move_train(
                train_id,
                &origin,
                &destination,
                true,
                destination == Project::Outgoing,
            )
            .await?;
        self.commit_arrival(train_id, &destination).await?;
        Ok(destination)
    }

    async fn commit_arrival(
        &self,
        train_id: &str,
        destination: &Project,
    ) -> Result<(), RouterError> {
        let advanced = self.state.advance(train_id).await?;
        if advanced != *destination {
            // Only possible if another worker consumed the route between our
            // peek and commit; per-train serialization is supposed to rule
            // that out.
            tracing::warn!(
                train_id,
                expected = %destination,
                advanced = %advanced,
                "Route advanced past the peeked station"
            );
        }
        self.state.set_current_station(train_id, destination).await
    }

    async fn maybe_trigger_demo(&self, train_id: &str, destination: &Project) {
        if let (Some(demo), Project::Station(station_id)) = (&self.demo, destination) {
            demo.trigger(train_id, station_id).await;
        }
    }
}

/// Map a handler error to the single failure response it owes the bus.
fn failure(train_id: &str, err: RouterError) -> RouterResponse {
    match err {
        RouterError::NotFound => {
            tracing::error!(train_id, "Train not found");
            RouterResponse::failed(Some(train_id), Some(ErrorCode::NotFound), "Train not found")
        }
        RouterError::InvalidRoute(msg) => {
            tracing::error!(train_id, error = %msg, "Invalid route");
            RouterResponse::failed(Some(train_id), Some(ErrorCode::InvalidRoute), msg)
        }
        RouterError::MoveFailed { tag, message } => {
            tracing::error!(train_id, tag, error = %message, "Registry move failed");
            RouterResponse::failed(
                Some(train_id),
                Some(ErrorCode::MoveFailed),
                format!("Error moving train images ({tag}): {message}"),
            )
        }
        RouterError::StoreUnavailable(msg) => {
            tracing::error!(train_id, error = %msg, "Store unavailable");
            RouterResponse::failed(Some(train_id), None, msg)
        }
        RouterError::MalformedMessage(msg) | RouterError::UnknownEvent(msg) => {
            RouterResponse::failed(Some(train_id), None, msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::MemoryRouteStore;
    use crate::state::MemoryStateStore;
    use crate::testing::{RecordingRegistry, RegistryCall};
    use crate::types::Route;

    struct Harness {
        routes: Arc<MemoryRouteStore>,
        state: Arc<MemoryStateStore>,
        registry: Arc<RecordingRegistry>,
        router: TrainRouter,
    }

    fn harness(auto_start: bool) -> Harness {
        let routes = Arc::new(MemoryRouteStore::new());
        let state = Arc::new(MemoryStateStore::new());
        let registry = Arc::new(RecordingRegistry::new());
        let router = TrainRouter::new(
            routes.clone(),
            state.clone(),
            RegistryMover::new(registry.clone()),
            auto_start,
            None,
        );
        Harness {
            routes,
            state,
            registry,
            router,
        }
    }

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

    fn built(id: &str) -> RouterCommand {
        RouterCommand::Built { train_id: id.into() }
    }

    fn start(id: &str) -> RouterCommand {
        RouterCommand::Start { train_id: id.into() }
    }

    fn stop(id: &str) -> RouterCommand {
        RouterCommand::Stop { train_id: id.into() }
    }

    fn pushed(id: &str, project: &str, operator: &str) -> RouterCommand {
        RouterCommand::Pushed {
            train_id: id.into(),
            project: project.into(),
            operator: operator.into(),
        }
    }

    async fn current(h: &Harness, id: &str) -> Project {
        h.state.current_station(id).await.unwrap()
    }

    #[tokio::test]
    async fn linear_happy_path() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a", "b"]));

        let response = h.router.process(&built("j1")).await;
        assert_eq!(response.event, ResponseEvent::Built);
        assert_eq!(h.state.status("j1").await.unwrap(), TrainStatus::Initialized);
        assert_eq!(current(&h, "j1").await, Project::Incoming);

        let response = h.router.process(&start("j1")).await;
        assert_eq!(response.event, ResponseEvent::Started);
        assert_eq!(h.state.status("j1").await.unwrap(), TrainStatus::Running);
        assert_eq!(current(&h, "j1").await, Project::Station("a".into()));
        // One move out of incoming: base + latest copied, source deleted.
        assert_eq!(
            h.registry.copies(),
            vec![
                ("station_a".to_string(), "pht_incoming/j1:base".to_string()),
                ("station_a".to_string(), "pht_incoming/j1:latest".to_string()),
            ]
        );

        let response = h.router.process(&pushed("j1", "station_a", "user")).await;
        assert_eq!(response.event, ResponseEvent::Moved);
        assert_eq!(
            response.message.as_deref(),
            Some("Origin: a - Destination: b")
        );
        assert_eq!(current(&h, "j1").await, Project::Station("b".into()));

        let response = h.router.process(&pushed("j1", "station_b", "user")).await;
        assert_eq!(response.event, ResponseEvent::Completed);
        assert_eq!(h.state.status("j1").await.unwrap(), TrainStatus::Completed);
        assert_eq!(current(&h, "j1").await, Project::Outgoing);
        assert!(!h.routes.contains("j1"), "route must be deleted on completion");

        // The outgoing move preserves only the working image.
        let copies = h.registry.copies();
        let outgoing: Vec<_> = copies
            .iter()
            .filter(|(dest, _)| dest == "pht_outgoing")
            .collect();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].1, "station_b/j1:latest");
    }

    #[tokio::test]
    async fn system_push_is_ignored() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a"]));
        h.router.process(&built("j1")).await;
        h.router.process(&start("j1")).await;
        let before = h.registry.calls().len();

        let response = h.router.process(&pushed("j1", "station_a", "system")).await;
        assert_eq!(response.event, ResponseEvent::Ignored);
        assert_eq!(h.state.status("j1").await.unwrap(), TrainStatus::Running);
        assert_eq!(current(&h, "j1").await, Project::Station("a".into()));
        assert_eq!(h.registry.calls().len(), before, "no registry traffic");
    }

    #[tokio::test]
    async fn starting_a_started_train_fails() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a", "b"]));
        h.router.process(&built("j1")).await;
        h.router.process(&start("j1")).await;

        let response = h.router.process(&start("j1")).await;
        assert_eq!(response.event, ResponseEvent::Failed);
        assert_eq!(response.error_code, Some(ErrorCode::AlreadyStarted));
        // State unchanged.
        assert_eq!(h.state.status("j1").await.unwrap(), TrainStatus::Running);
        assert_eq!(current(&h, "j1").await, Project::Station("a".into()));
        assert_eq!(h.state.remaining_route("j1"), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn periodic_route_traverses_all_epochs() {
        let h = harness(false);
        h.routes.insert(periodic("j2", &["x", "y"], 2));
        h.router.process(&built("j2")).await;

        let mut stations = vec![current(&h, "j2").await.token()];
        let mut epochs = Vec::new();

        let response = h.router.process(&start("j2")).await;
        assert_eq!(response.event, ResponseEvent::Started);
        stations.push(current(&h, "j2").await.token());
        epochs.push(h.state.epoch("j2").await.unwrap().unwrap());

        loop {
            let at = current(&h, "j2").await.project_name();
            let response = h.router.process(&pushed("j2", &at, "user")).await;
            stations.push(current(&h, "j2").await.token());
            match response.event {
                ResponseEvent::Moved => {
                    epochs.push(h.state.epoch("j2").await.unwrap().unwrap());
                }
                ResponseEvent::Completed => break,
                other => panic!("unexpected response: {other:?}"),
            }
        }

        assert_eq!(
            stations,
            vec![
                "pht_incoming",
                "x",
                "y",
                "x",
                "y",
                "x",
                "y",
                "pht_outgoing"
            ]
        );
        assert_eq!(epochs, vec![0, 0, 1, 1, 2, 2]);
        assert_eq!(h.state.status("j2").await.unwrap(), TrainStatus::Completed);
        assert!(!h.routes.contains("j2"));
    }

    #[tokio::test]
    async fn start_recovers_missing_state_from_catalog() {
        let h = harness(false);
        h.routes.insert(linear("j3", &["a"]));
        // No BUILT event; the state store lost the train (restart).

        let response = h.router.process(&start("j3")).await;
        assert_eq!(response.event, ResponseEvent::Started);
        assert_eq!(h.state.status("j3").await.unwrap(), TrainStatus::Running);
        assert_eq!(current(&h, "j3").await, Project::Station("a".into()));
    }

    #[tokio::test]
    async fn start_without_route_fails_not_found() {
        let h = harness(false);
        let response = h.router.process(&start("ghost")).await;
        assert_eq!(response.event, ResponseEvent::Failed);
        assert_eq!(response.error_code, Some(ErrorCode::NotFound));
        assert!(!h.state.exists("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn built_without_route_fails_not_found() {
        let h = harness(false);
        let response = h.router.process(&built("ghost")).await;
        assert_eq!(response.event, ResponseEvent::Failed);
        assert_eq!(response.error_code, Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn built_twice_leaves_state_untouched() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a", "b"]));
        h.router.process(&built("j1")).await;
        h.router.process(&start("j1")).await;

        // Re-registering must not reset the consumed route or the status.
        let response = h.router.process(&built("j1")).await;
        assert_eq!(response.event, ResponseEvent::Built);
        assert_eq!(h.state.status("j1").await.unwrap(), TrainStatus::Running);
        assert_eq!(h.state.remaining_route("j1"), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn auto_start_chains_built_into_started() {
        let h = harness(true);
        h.routes.insert(linear("j1", &["a"]));

        let response = h.router.process(&built("j1")).await;
        assert_eq!(response.event, ResponseEvent::Started);
        assert_eq!(h.state.status("j1").await.unwrap(), TrainStatus::Running);
        assert_eq!(current(&h, "j1").await, Project::Station("a".into()));
    }

    #[tokio::test]
    async fn failed_move_keeps_route_intact() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a", "b"]));
        h.router.process(&built("j1")).await;

        h.registry.fail_copies(true);
        let response = h.router.process(&start("j1")).await;
        assert_eq!(response.event, ResponseEvent::Failed);
        assert_eq!(response.error_code, Some(ErrorCode::MoveFailed));
        // Nothing committed: still initialized at incoming with the full
        // route ahead of it.
        assert_eq!(h.state.status("j1").await.unwrap(), TrainStatus::Initialized);
        assert_eq!(current(&h, "j1").await, Project::Incoming);
        assert_eq!(
            h.state.remaining_route("j1"),
            vec!["a".to_string(), "b".to_string()]
        );

        // The registry comes back; the retry visits station a, not b.
        h.registry.fail_copies(false);
        let response = h.router.process(&start("j1")).await;
        assert_eq!(response.event, ResponseEvent::Started);
        assert_eq!(current(&h, "j1").await, Project::Station("a".into()));
    }

    #[tokio::test]
    async fn failed_move_on_push_keeps_state() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a", "b"]));
        h.router.process(&built("j1")).await;
        h.router.process(&start("j1")).await;

        h.registry.fail_copies(true);
        let response = h.router.process(&pushed("j1", "station_a", "user")).await;
        assert_eq!(response.event, ResponseEvent::Failed);
        assert_eq!(response.error_code, Some(ErrorCode::MoveFailed));
        assert_eq!(h.state.status("j1").await.unwrap(), TrainStatus::Running);
        assert_eq!(current(&h, "j1").await, Project::Station("a".into()));
        assert_eq!(h.state.remaining_route("j1"), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn source_delete_failure_does_not_fail_the_move() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a"]));
        h.router.process(&built("j1")).await;

        h.registry.fail_deletes(true);
        let response = h.router.process(&start("j1")).await;
        assert_eq!(response.event, ResponseEvent::Started);
        assert_eq!(current(&h, "j1").await, Project::Station("a".into()));
    }

    #[tokio::test]
    async fn stop_lifecycle() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a", "b"]));
        h.router.process(&built("j1")).await;

        // Not started yet.
        let response = h.router.process(&stop("j1")).await;
        assert_eq!(response.error_code, Some(ErrorCode::NotStarted));

        h.router.process(&start("j1")).await;
        let response = h.router.process(&stop("j1")).await;
        assert_eq!(response.event, ResponseEvent::Stopped);
        assert_eq!(h.state.status("j1").await.unwrap(), TrainStatus::Stopped);

        // Stopping again is rejected and changes nothing.
        let response = h.router.process(&stop("j1")).await;
        assert_eq!(response.event, ResponseEvent::Failed);
        assert_eq!(response.error_code, Some(ErrorCode::AlreadyStopped));
        assert_eq!(h.state.status("j1").await.unwrap(), TrainStatus::Stopped);

        // A stopped train rejects pushes.
        let response = h.router.process(&pushed("j1", "station_a", "user")).await;
        assert_eq!(response.error_code, Some(ErrorCode::NotRunning));
        assert_eq!(current(&h, "j1").await, Project::Station("a".into()));

        // START resumes from where it stopped.
        let response = h.router.process(&start("j1")).await;
        assert_eq!(response.event, ResponseEvent::Started);
        assert_eq!(current(&h, "j1").await, Project::Station("b".into()));
    }

    #[tokio::test]
    async fn stop_unknown_train_fails_not_found() {
        let h = harness(false);
        let response = h.router.process(&stop("ghost")).await;
        assert_eq!(response.event, ResponseEvent::Failed);
        assert_eq!(response.error_code, Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn push_for_unknown_train_fails_not_found() {
        let h = harness(false);
        let response = h.router.process(&pushed("ghost", "station_a", "user")).await;
        assert_eq!(response.event, ResponseEvent::Failed);
        assert_eq!(response.error_code, Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn status_reports_lifecycle() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a"]));
        h.router.process(&built("j1")).await;

        let response = h
            .router
            .process(&RouterCommand::Status { train_id: "j1".into() })
            .await;
        assert_eq!(response.event, ResponseEvent::Status);
        assert_eq!(response.message.as_deref(), Some("initialized"));

        let response = h
            .router
            .process(&RouterCommand::Status { train_id: "ghost".into() })
            .await;
        assert_eq!(response.event, ResponseEvent::Failed);
        assert_eq!(response.error_code, Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn completed_train_rejects_start_stop_and_push() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a"]));
        h.router.process(&built("j1")).await;
        h.router.process(&start("j1")).await;
        let response = h.router.process(&pushed("j1", "station_a", "user")).await;
        assert_eq!(response.event, ResponseEvent::Completed);

        let response = h.router.process(&start("j1")).await;
        assert_eq!(response.error_code, Some(ErrorCode::NotFound));
        let response = h.router.process(&stop("j1")).await;
        assert_eq!(response.error_code, Some(ErrorCode::NotStarted));
        let response = h.router.process(&pushed("j1", "pht_outgoing", "user")).await;
        assert_eq!(response.error_code, Some(ErrorCode::NotRunning));
    }

    #[tokio::test]
    async fn reset_returns_train_to_initial_state() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a", "b"]));
        h.router.process(&built("j1")).await;
        h.router.process(&start("j1")).await;
        h.router.process(&pushed("j1", "station_a", "user")).await;
        assert_eq!(current(&h, "j1").await, Project::Station("b".into()));

        h.registry.set_locations(&["station_b"]);
        let response = h
            .router
            .process(&RouterCommand::Reset { train_id: "j1".into() })
            .await;
        assert_eq!(response.event, ResponseEvent::Built);

        // The image pair went back to incoming and latest was restored from
        // base.
        let calls = h.registry.calls();
        assert!(calls.contains(&RegistryCall::Copy {
            dest_project: "pht_incoming".into(),
            repository: "j1".into(),
            source: "station_b/j1:base".into(),
        }));
        assert!(calls.contains(&RegistryCall::Retag {
            project: "pht_incoming".into(),
            repository: "j1".into(),
            reference: "base".into(),
            tag: "latest".into(),
        }));

        // State equals the state immediately after BUILT.
        assert_eq!(h.state.status("j1").await.unwrap(), TrainStatus::Initialized);
        assert_eq!(current(&h, "j1").await, Project::Incoming);
        assert_eq!(
            h.state.remaining_route("j1"),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[tokio::test]
    async fn reset_leaves_latest_alone_when_already_on_base() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a"]));
        // The base artifact already carries the latest tag; nothing to
        // restore.
        h.registry.set_tags(&["base", "latest"]);

        let response = h
            .router
            .process(&RouterCommand::Reset { train_id: "j1".into() })
            .await;
        assert_eq!(response.event, ResponseEvent::Built);
        assert!(!h
            .registry
            .calls()
            .iter()
            .any(|c| matches!(c, RegistryCall::Retag { .. } | RegistryCall::RemoveTag { .. })));
    }

    #[tokio::test]
    async fn reset_skips_utility_projects() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a"]));
        h.registry.set_locations(&["pht_incoming"]);

        let response = h
            .router
            .process(&RouterCommand::Reset { train_id: "j1".into() })
            .await;
        assert_eq!(response.event, ResponseEvent::Built);
        // Nothing to relocate; only the latest restore touched the registry.
        assert!(h.registry.copies().is_empty());
    }

    #[tokio::test]
    async fn reset_without_route_fails_not_found() {
        let h = harness(false);
        let response = h
            .router
            .process(&RouterCommand::Reset { train_id: "ghost".into() })
            .await;
        assert_eq!(response.event, ResponseEvent::Failed);
        assert_eq!(response.error_code, Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn unknown_event_fails_without_state_change() {
        let h = harness(false);
        let response = h
            .router
            .process(&RouterCommand::Unknown {
                event_type: "paintTrain".into(),
                train_id: Some("j1".into()),
            })
            .await;
        assert_eq!(response.event, ResponseEvent::Failed);
        assert!(response.error_code.is_none());
        assert!(!h.state.exists("j1").await.unwrap());
    }

    #[tokio::test]
    async fn sync_registers_only_missing_trains() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a", "b"]));
        h.routes.insert(linear("j2", &["c"]));

        // j1 is live and mid-route; sync must not disturb it.
        h.router.process(&built("j1")).await;
        h.router.process(&start("j1")).await;

        h.router.sync_routes().await.unwrap();

        assert_eq!(h.state.status("j1").await.unwrap(), TrainStatus::Running);
        assert_eq!(h.state.remaining_route("j1"), vec!["b".to_string()]);
        assert_eq!(h.state.status("j2").await.unwrap(), TrainStatus::Initialized);
        assert_eq!(current(&h, "j2").await, Project::Incoming);
    }

    #[tokio::test]
    async fn response_train_id_echoes_command() {
        let h = harness(false);
        h.routes.insert(linear("j1", &["a"]));
        for command in [
            built("j1"),
            start("j1"),
            pushed("j1", "station_a", "user"),
            stop("j1"),
            RouterCommand::Status { train_id: "j1".into() },
        ] {
            let response = h.router.process(&command).await;
            assert_eq!(response.train_id.as_deref(), command.train_id());
        }
    }
}
