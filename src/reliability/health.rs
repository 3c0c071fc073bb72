use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub const DELIVERY_SINK: &str = "delivery_sink";
pub const ERROR_SINK: &str = "error_sink";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentHealth {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub unhealthy_threshold: u32,
    pub recovery_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            recovery_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct ComponentState {
    health: ComponentHealth,
    recent_checks: VecDeque<bool>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_check: Option<Instant>,
}

impl ComponentState {
    fn new() -> Self {
        Self {
            health: ComponentHealth::Healthy,
            recent_checks: VecDeque::with_capacity(100),
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check: None,
        }
    }
}

/// Tracks the health of the storage collaborators.
///
/// Outcomes of individual writes feed `record_outcome`; a run of failures
/// degrades and then fails the component, a run of successes restores it.
pub struct HealthMonitor {
    config: HealthConfig,
    components: RwLock<HashMap<String, ComponentState>>,
    started_at: Instant,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            components: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    /// Starts with the given components registered as healthy, so an idle
    /// engine reports healthy.
    pub fn with_components(config: HealthConfig, components: &[&str]) -> Self {
        let components = components
            .iter()
            .map(|name| ((*name).to_string(), ComponentState::new()))
            .collect();
        Self {
            config,
            components: RwLock::new(components),
            started_at: Instant::now(),
        }
    }

    pub async fn update_component_health(&self, component: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        let state = components
            .entry(component.to_string())
            .or_insert_with(ComponentState::new);

        if state.health != health {
            tracing::info!(component, from = ?state.health, to = ?health, "Component health changed");
        }
        state.health = health;
        state.last_check = Some(Instant::now());
    }

    pub async fn record_outcome(&self, component: &str, success: bool) {
        let mut components = self.components.write().await;
        let state = components
            .entry(component.to_string())
            .or_insert_with(ComponentState::new);

        state.recent_checks.push_back(success);
        if state.recent_checks.len() > 100 {
            state.recent_checks.pop_front();
        }
        state.last_check = Some(Instant::now());

        if success {
            state.consecutive_successes += 1;
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures += 1;
            state.consecutive_successes = 0;
        }

        let new_health = if state.consecutive_failures >= self.config.unhealthy_threshold {
            ComponentHealth::Unhealthy(format!(
                "{} consecutive write failures",
                state.consecutive_failures
            ))
        } else if state.consecutive_failures > 0 {
            ComponentHealth::Degraded(format!(
                "{} consecutive write failures",
                state.consecutive_failures
            ))
        } else if state.consecutive_successes >= self.config.recovery_threshold
            || matches!(state.health, ComponentHealth::Degraded(_))
        {
            ComponentHealth::Healthy
        } else {
            state.health.clone()
        };

        if new_health != state.health {
            tracing::info!(
                component,
                from = ?state.health,
                to = ?new_health,
                "Component health changed"
            );
            state.health = new_health;
        }
    }

    pub async fn get_overall_health(&self) -> HealthStatus {
        let components = self.components.read().await;

        let mut status = HealthStatus::Healthy;
        for state in components.values() {
            match &state.health {
                ComponentHealth::Unhealthy(_) => return HealthStatus::Unhealthy,
                ComponentHealth::Degraded(_) => status = HealthStatus::Degraded,
                ComponentHealth::Healthy => {}
            }
        }
        status
    }

    pub async fn get_component_health(&self, component: &str) -> Option<ComponentHealth> {
        let components = self.components.read().await;
        components.get(component).map(|state| state.health.clone())
    }

    pub async fn get_all_component_status(&self) -> BTreeMap<String, ComponentHealth> {
        let components = self.components.read().await;
        components
            .iter()
            .map(|(name, state)| (name.clone(), state.health.clone()))
            .collect()
    }

    pub async fn report(&self) -> HealthReport {
        HealthReport {
            overall_status: self.get_overall_health().await,
            components: self.get_all_component_status().await,
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub timestamp: String,
    pub uptime: Duration,
}
