use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RouterError;

/// Image tags that travel together as one train.
pub const TAG_BASE: &str = "base";
pub const TAG_LATEST: &str = "latest";

/// Lifecycle status of a train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainStatus {
    Initialized,
    Started,
    Running,
    Stopped,
    Completed,
}

impl TrainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainStatus::Initialized => "initialized",
            TrainStatus::Started => "started",
            TrainStatus::Running => "running",
            TrainStatus::Stopped => "stopped",
            TrainStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, RouterError> {
        match s {
            "initialized" => Ok(TrainStatus::Initialized),
            "started" => Ok(TrainStatus::Started),
            "running" => Ok(TrainStatus::Running),
            "stopped" => Ok(TrainStatus::Stopped),
            "completed" => Ok(TrainStatus::Completed),
            other => Err(RouterError::StoreUnavailable(format!(
                "unknown train status in store: {other}"
            ))),
        }
    }

    /// A train accepts push events only while it is on the move.
    pub fn is_active(&self) -> bool {
        matches!(self, TrainStatus::Started | TrainStatus::Running)
    }
}

impl fmt::Display for TrainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a route is traversed once or `epochs + 1` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteType {
    Linear,
    Periodic,
}

impl RouteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteType::Linear => "linear",
            RouteType::Periodic => "periodic",
        }
    }

    pub fn parse(s: &str) -> Result<Self, RouterError> {
        match s {
            "linear" => Ok(RouteType::Linear),
            "periodic" => Ok(RouteType::Periodic),
            other => Err(RouterError::StoreUnavailable(format!(
                "unknown route type in store: {other}"
            ))),
        }
    }
}

/// A registry project a train can reside in: one of the fixed utility
/// projects or a station project (`station_<id>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Project {
    Incoming,
    Outgoing,
    Interop,
    Station(String),
}

impl Project {
    pub const INCOMING_NAME: &'static str = "pht_incoming";
    pub const OUTGOING_NAME: &'static str = "pht_outgoing";
    pub const INTEROP_NAME: &'static str = "pht_interop";

    /// Parse the token form stored in the state store and used in route
    /// definitions: a utility-project literal or a bare station id.
    pub fn from_token(token: &str) -> Self {
        match token {
            Self::INCOMING_NAME => Project::Incoming,
            Self::OUTGOING_NAME => Project::Outgoing,
            Self::INTEROP_NAME => Project::Interop,
            station => Project::Station(station.to_string()),
        }
    }

    /// Parse a registry project name (`pht_*` or `station_<id>`).
    pub fn from_project_name(name: &str) -> Self {
        match name {
            Self::INCOMING_NAME => Project::Incoming,
            Self::OUTGOING_NAME => Project::Outgoing,
            Self::INTEROP_NAME => Project::Interop,
            other => match other.strip_prefix("station_") {
                Some(id) => Project::Station(id.to_string()),
                None => Project::Station(other.to_string()),
            },
        }
    }

    /// The token form: utility literal or bare station id.
    pub fn token(&self) -> String {
        match self {
            Project::Incoming => Self::INCOMING_NAME.to_string(),
            Project::Outgoing => Self::OUTGOING_NAME.to_string(),
            Project::Interop => Self::INTEROP_NAME.to_string(),
            Project::Station(id) => id.clone(),
        }
    }

    /// The registry project name this maps to.
    pub fn project_name(&self) -> String {
        match self {
            Project::Incoming => Self::INCOMING_NAME.to_string(),
            Project::Outgoing => Self::OUTGOING_NAME.to_string(),
            Project::Interop => Self::INTEROP_NAME.to_string(),
            Project::Station(id) => format!("station_{id}"),
        }
    }

    pub fn is_utility(&self) -> bool {
        !matches!(self, Project::Station(_))
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// A route as stored in the secret store: the ordered station list plus
/// periodicity metadata, keyed by the train's repository suffix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "repositorySuffix")]
    pub repository_suffix: String,
    pub stations: Vec<String>,
    pub periodic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epochs: Option<u32>,
}

impl Route {
    /// Check the structural invariants: at least one station, and epochs
    /// present and positive exactly when the route is periodic.
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.repository_suffix.is_empty() {
            return Err(RouterError::InvalidRoute(
                "route has an empty repository suffix".into(),
            ));
        }
        if self.stations.is_empty() {
            return Err(RouterError::InvalidRoute(format!(
                "route for train {} has no stations",
                self.repository_suffix
            )));
        }
        match (self.periodic, self.epochs) {
            (true, None) | (true, Some(0)) => Err(RouterError::InvalidRoute(format!(
                "periodic route for train {} must have a positive epoch count",
                self.repository_suffix
            ))),
            (false, Some(_)) => Err(RouterError::InvalidRoute(format!(
                "linear route for train {} must not carry an epoch count",
                self.repository_suffix
            ))),
            _ => Ok(()),
        }
    }

    pub fn route_type(&self) -> RouteType {
        if self.periodic {
            RouteType::Periodic
        } else {
            RouteType::Linear
        }
    }
}
