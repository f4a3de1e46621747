use crate::application::{Application, RefreshType, REFRESH_ANNOTATION};
use crate::errors::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use kube::{
    api::{Api, Patch, PatchParams, ResourceExt},
    runtime::{watcher, WatchStreamExt},
};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Change observed on a watched Application
#[derive(Clone, Debug)]
pub enum ApplicationEvent {
    /// The Application was created or updated, or is reported as part of
    /// the initial state
    Applied(Application),
    Deleted(Application),
}

/// Mutate-and-watch access to the Applications of one namespace
#[async_trait]
pub trait ApplicationInterface: Send + Sync {
    /// Apply a JSON merge patch to the named Application
    async fn merge_patch(&self, name: &str, patch: &serde_json::Value) -> Result<Application>;

    /// Watch the named Application. The stream starts with the current
    /// state of the object, if it exists. Errors reported by the stream are
    /// transient, the stream keeps going after them. Dropping the stream
    /// ends the subscription.
    async fn watch_application(
        &self,
        name: &str,
    ) -> Result<BoxStream<'static, Result<ApplicationEvent>>>;
}

#[async_trait]
impl ApplicationInterface for Api<Application> {
    async fn merge_patch(&self, name: &str, patch: &serde_json::Value) -> Result<Application> {
        self.patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| Error::from_kube(e, "Application", name))
    }

    async fn watch_application(
        &self,
        name: &str,
    ) -> Result<BoxStream<'static, Result<ApplicationEvent>>> {
        let config = watcher::Config::default().fields(&format!("metadata.name={name}"));
        // never give up, only the caller's timeout or cancellation ends a wait
        let backoff = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(None)
            .build();
        let events = watcher(self.clone(), config)
            .backoff(backoff)
            .flat_map(|event| {
                let events: Vec<Result<ApplicationEvent>> = match event {
                    Ok(watcher::Event::Applied(app)) => vec![Ok(ApplicationEvent::Applied(app))],
                    Ok(watcher::Event::Deleted(app)) => vec![Ok(ApplicationEvent::Deleted(app))],
                    Ok(watcher::Event::Restarted(apps)) => apps
                        .into_iter()
                        .map(|app| Ok(ApplicationEvent::Applied(app)))
                        .collect(),
                    Err(e) => vec![Err(Error::Watch(e))],
                };
                stream::iter(events)
            })
            .boxed();
        Ok(events)
    }
}

/// Ask the controller to refresh the named Application.
pub async fn refresh_app(
    apps: &dyn ApplicationInterface,
    name: &str,
    refresh_type: RefreshType,
) -> Result<Application> {
    let patch = json!({
        "metadata": {
            "annotations": {
                REFRESH_ANNOTATION: refresh_type.as_str(),
            }
        }
    });
    let app = apps.merge_patch(name, &patch).await?;
    info!(application = name, %refresh_type, "refresh requested");
    Ok(app)
}

/// Mark the pending refresh of the named Application as processed.
///
/// Only the controller calls this, once it has evaluated the Application.
pub async fn acknowledge_refresh(
    apps: &dyn ApplicationInterface,
    name: &str,
) -> Result<Application> {
    let patch = json!({
        "metadata": {
            "annotations": {
                REFRESH_ANNOTATION: null,
            }
        }
    });
    let app = apps.merge_patch(name, &patch).await?;
    info!(application = name, "refresh acknowledged");
    Ok(app)
}

/// Wait until the controller has processed the pending refresh of the named
/// Application, i.e. until the refresh annotation is gone.
///
/// Gives up with `Error::DeadlineExceeded` once `timeout` elapses and with
/// `Error::Cancelled` when `cancel` fires. Without a timeout only `cancel`
/// bounds the wait. Watch failures are logged and do not end the wait.
pub async fn wait_for_refresh(
    apps: &dyn ApplicationInterface,
    name: &str,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<Application> {
    let mut events = apps.watch_application(name).await?;

    let acknowledged = async {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        application = name,
                        error = %e,
                        "watch failed, waiting for it to recover"
                    );
                    continue;
                }
            };
            match event {
                ApplicationEvent::Applied(app) if app.name_any() == name => {
                    match app.refresh_requested() {
                        None => return Ok(app),
                        Some(refresh_type) => {
                            debug!(application = name, %refresh_type, "refresh still pending");
                        }
                    }
                }
                ApplicationEvent::Deleted(app) if app.name_any() == name => {
                    return Err(Error::Deleted(name.to_string()));
                }
                _ => {}
            }
        }
        Err::<Application, Error>(Error::WatchClosed(name.to_string()))
    };

    let bounded = async {
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, acknowledged)
                .await
                .unwrap_or_else(|_| Err(Error::DeadlineExceeded(name.to_string()))),
            None => acknowledged.await,
        }
    };

    // the watch stream is dropped when leaving this function, whatever the outcome
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled(name.to_string())),
        result = bounded => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ApplicationSpec;
    use futures::channel::mpsc;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    const TIMEOUT: Duration = Duration::from_millis(100);

    /// In-memory Applications. Every change is broadcast to the open watches.
    #[derive(Default)]
    struct FakeApps {
        apps: Mutex<BTreeMap<String, Application>>,
        watches: Mutex<Vec<mpsc::UnboundedSender<Result<ApplicationEvent>>>>,
    }

    impl FakeApps {
        fn with_app(app: Application) -> Self {
            let fake = Self::default();
            fake.apps.lock().unwrap().insert(app.name_any(), app);
            fake
        }

        fn broadcast(&self, event: ApplicationEvent) {
            for watch in self.watches.lock().unwrap().iter() {
                // closed watches are ignored
                let _ = watch.unbounded_send(Ok(event.clone()));
            }
        }

        fn add(&self, app: Application) {
            self.apps.lock().unwrap().insert(app.name_any(), app.clone());
            self.broadcast(ApplicationEvent::Applied(app));
        }

        fn delete(&self, name: &str) {
            let app = self.apps.lock().unwrap().remove(name);
            if let Some(app) = app {
                self.broadcast(ApplicationEvent::Deleted(app));
            }
        }

        fn fail_watches(&self, message: &str) {
            for watch in self.watches.lock().unwrap().iter() {
                let _ = watch.unbounded_send(Err(Error::Internal(message.to_string())));
            }
        }

        fn all_watches_closed(&self) -> bool {
            self.watches.lock().unwrap().iter().all(|w| w.is_closed())
        }

        fn get(&self, name: &str) -> Option<Application> {
            self.apps.lock().unwrap().get(name).cloned()
        }
    }

    #[async_trait]
    impl ApplicationInterface for FakeApps {
        async fn merge_patch(&self, name: &str, patch: &serde_json::Value) -> Result<Application> {
            let app = {
                let mut apps = self.apps.lock().unwrap();
                let app = apps.get_mut(name).ok_or_else(|| Error::NotFound {
                    kind: "Application",
                    name: name.to_string(),
                })?;
                if let Some(annotations) = patch["metadata"]["annotations"].as_object() {
                    for (key, value) in annotations {
                        match value.as_str() {
                            Some(value) => {
                                app.annotations_mut().insert(key.clone(), value.to_string());
                            }
                            None => {
                                app.annotations_mut().remove(key);
                            }
                        }
                    }
                }
                app.clone()
            };
            self.broadcast(ApplicationEvent::Applied(app.clone()));
            Ok(app)
        }

        async fn watch_application(
            &self,
            name: &str,
        ) -> Result<BoxStream<'static, Result<ApplicationEvent>>> {
            let (tx, rx) = mpsc::unbounded();
            if let Some(app) = self.get(name) {
                tx.unbounded_send(Ok(ApplicationEvent::Applied(app)))
                    .expect("receiver is alive");
            }
            self.watches.lock().unwrap().push(tx);
            Ok(rx.boxed())
        }
    }

    fn test_app() -> Application {
        let mut app = Application::new("test-app", ApplicationSpec::default());
        app.metadata.namespace = Some("default".to_string());
        app
    }

    fn pending_app() -> Application {
        let mut app = test_app();
        app.annotations_mut()
            .insert(REFRESH_ANNOTATION.to_string(), "normal".to_string());
        app
    }

    #[tokio::test]
    async fn refresh_app_sets_annotation() {
        let apps = FakeApps::with_app(test_app());

        let app = refresh_app(&apps, "test-app", RefreshType::Hard)
            .await
            .expect("refresh should succeed");
        assert_eq!(app.refresh_requested(), Some(RefreshType::Hard));
        assert_eq!(
            apps.get("test-app").and_then(|app| app.refresh_requested()),
            Some(RefreshType::Hard)
        );
    }

    #[tokio::test]
    async fn refresh_missing_app() {
        let apps = FakeApps::default();

        let result = refresh_app(&apps, "test-app", RefreshType::Normal).await;
        assert!(matches!(result, Err(Error::NotFound { kind: "Application", .. })));
    }

    #[tokio::test]
    async fn wait_times_out() {
        let apps = FakeApps::default();

        let result =
            wait_for_refresh(&apps, "test-app", Some(TIMEOUT), &CancellationToken::new()).await;
        let error = result.expect_err("wait should time out");
        assert!(
            error.to_string().to_lowercase().contains("deadline exceeded"),
            "{error}"
        );
        assert!(apps.all_watches_closed());
    }

    #[tokio::test]
    async fn wait_times_out_while_refresh_is_pending() {
        let apps = FakeApps::with_app(pending_app());

        let result =
            wait_for_refresh(&apps, "test-app", Some(TIMEOUT), &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::DeadlineExceeded(_))));
        assert!(apps.all_watches_closed());
    }

    #[tokio::test]
    async fn wait_sees_added_app() {
        let apps = FakeApps::default();
        let cancel = CancellationToken::new();

        let (result, _) = tokio::join!(
            wait_for_refresh(&apps, "test-app", Some(TIMEOUT), &cancel),
            async { apps.add(test_app()) },
        );
        let app = result.expect("wait should succeed");
        assert_eq!(app.name_any(), "test-app");
        assert!(apps.all_watches_closed());
    }

    #[tokio::test]
    async fn wait_sees_already_acknowledged_refresh() {
        let apps = FakeApps::with_app(test_app());

        let app = wait_for_refresh(&apps, "test-app", Some(TIMEOUT), &CancellationToken::new())
            .await
            .expect("wait should succeed");
        assert_eq!(app.refresh_requested(), None);
    }

    #[tokio::test]
    async fn full_refresh_cycle() {
        let apps = FakeApps::with_app(test_app());
        refresh_app(&apps, "test-app", RefreshType::Normal)
            .await
            .expect("refresh should succeed");
        let cancel = CancellationToken::new();

        let (result, acknowledged) = tokio::join!(
            wait_for_refresh(&apps, "test-app", None, &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                acknowledge_refresh(&apps, "test-app").await
            },
        );
        acknowledged.expect("acknowledge should succeed");
        let app = result.expect("wait should succeed");
        assert_eq!(app.refresh_requested(), None);
        assert!(apps.all_watches_closed());
    }

    #[tokio::test]
    async fn wait_is_cancelled() {
        let apps = FakeApps::with_app(pending_app());
        let cancel = CancellationToken::new();

        let (result, _) = tokio::join!(
            wait_for_refresh(&apps, "test-app", None, &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            },
        );
        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert!(apps.all_watches_closed());
    }

    #[tokio::test]
    async fn wait_fails_when_app_is_deleted() {
        let apps = FakeApps::with_app(pending_app());
        let cancel = CancellationToken::new();

        let (result, _) = tokio::join!(
            wait_for_refresh(&apps, "test-app", Some(TIMEOUT), &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                apps.delete("test-app");
            },
        );
        assert!(matches!(result, Err(Error::Deleted(_))));
    }

    #[tokio::test]
    async fn other_apps_are_ignored() {
        let apps = FakeApps::with_app(pending_app());
        let cancel = CancellationToken::new();

        let (result, _) = tokio::join!(
            wait_for_refresh(&apps, "test-app", Some(TIMEOUT), &cancel),
            async {
                apps.add(Application::new("other-app", ApplicationSpec::default()));
            },
        );
        assert!(matches!(result, Err(Error::DeadlineExceeded(_))));
    }

    #[tokio::test]
    async fn wait_survives_watch_failures() {
        let apps = FakeApps::with_app(pending_app());
        let cancel = CancellationToken::new();

        let (result, _) = tokio::join!(
            wait_for_refresh(&apps, "test-app", Some(Duration::from_secs(1)), &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                apps.fail_watches("410 Gone");
                apps.add(test_app());
            },
        );
        let app = result.expect("wait should succeed");
        assert_eq!(app.refresh_requested(), None);
        assert!(apps.all_watches_closed());
    }

    #[tokio::test]
    async fn watch_failures_do_not_stop_the_timeout() {
        let apps = FakeApps::with_app(pending_app());
        let cancel = CancellationToken::new();

        let (result, _) = tokio::join!(
            wait_for_refresh(&apps, "test-app", Some(TIMEOUT), &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                apps.fail_watches("connection reset");
            },
        );
        assert!(matches!(result, Err(Error::DeadlineExceeded(_))));
    }
}
