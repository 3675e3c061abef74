//! The fetch loop: authenticate, poll the upstream on a fixed cadence,
//! decode, persist, publish, and keep the health counters honest.
//!
//! A failing cycle never leaves the loop: it is recorded in [`FetchState`]
//! and the next tick tries again. Only the shutdown signal ends the loop.

use std::sync::Arc;

use chrono::Utc;
use glcmd_broker::Event;
use glcmd_client::{decode_connection, AuthSession, LinkUpClient};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::state::AppState;

pub struct Fetcher {
    client: LinkUpClient,
    state: Arc<AppState>,
    email: String,
    password: String,
}

impl Fetcher {
    pub fn new(client: LinkUpClient, state: Arc<AppState>, email: String, password: String) -> Self {
        Fetcher {
            client,
            state,
            email,
            password,
        }
    }

    /// Run until the shutdown signal fires. The first cycle runs immediately
    /// so clients see fresh data right after startup.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut session: Option<AuthSession> = None;

        info!("fetch loop starting");
        self.fetch_cycle(&mut session).await;

        let mut ticker = tokio::time::interval(self.state.fetch_interval);
        ticker.tick().await; // the immediate first tick is already spent

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Racing the cycle against shutdown aborts it cleanly:
                    // dropped mid-flight, nothing is recorded as an error.
                    tokio::select! {
                        _ = self.fetch_cycle(&mut session) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("fetch loop stopped");
    }

    /// One cycle; failures land in the shared fetch state.
    pub async fn fetch_cycle(&self, session: &mut Option<AuthSession>) {
        match self.try_cycle(session).await {
            Ok(()) => {
                let mut fetch = self.state.fetch.write().await;
                fetch.consecutive_errors = 0;
                fetch.last_fetch_at = Some(Utc::now());
                fetch.last_error = None;
            }
            Err(err) => {
                let mut fetch = self.state.fetch.write().await;
                fetch.consecutive_errors += 1;
                fetch.last_error = Some(err.to_string());
                warn!(
                    consecutive_errors = fetch.consecutive_errors,
                    error = %err,
                    "fetch cycle failed"
                );
            }
        }
    }

    async fn try_cycle(&self, session: &mut Option<AuthSession>) -> anyhow::Result<()> {
        // Re-authenticate when the token is absent or would expire within one
        // fetch interval.
        let stale = session
            .as_ref()
            .map_or(true, |s| s.needs_refresh(self.state.fetch_interval, Utc::now()));
        if stale {
            let fresh = self.client.login(&self.email, &self.password).await?;
            info!(expires_at = %fresh.expires_at, "authenticated against upstream");
            *session = Some(fresh);
        }
        let Some(active) = session.as_ref() else {
            anyhow::bail!("no session after authentication");
        };

        let payload = self.client.fetch_latest(active).await?;
        let record = decode_connection(&payload, Utc::now())?;

        self.state.settings.save_glucose_targets(&record.targets).await?;
        self.state
            .settings
            .save_user_preferences(&record.preferences)
            .await?;
        if let Some(device) = &record.device {
            self.state.settings.save_device_info(device).await?;
        }

        let inserted = self.state.glucose.save_measurement(&record.measurement).await?;

        // The replacement transaction runs before the reading stamp so a
        // retired sensor's ended_at reflects its own final reading, not the
        // first reading of its successor.
        let sensor_is_new = self.state.sensor.handle_sensor_change(&record.sensor).await?;

        if inserted {
            self.state
                .sensor
                .update_last_measurement_if_newer(record.measurement.timestamp)
                .await?;
        }

        if sensor_is_new {
            let view = record.sensor.clone().with_status(Utc::now());
            let payload = serde_json::to_value(&view).unwrap_or(serde_json::Value::Null);
            self.state.broker.publish(&Event::sensor(payload));
            info!("new sensor detected");
        }

        Ok(())
    }
}
