//! Job submission and status endpoints.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use encodeq_core::{Job, JobId, Submission};
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs).post(create_job))
        .route("/{id}", get(get_job))
}

/// Body of `POST /api/v1/jobs`. Missing fields are reported by validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreateJobRequest {
    filename: String,
    submitter_id: String,
    metadata: Option<serde_json::Value>,
}

/// Query of the `GET /jobs/enqueue` endpoint kept for existing clients.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LegacyEnqueueQuery {
    filename: String,
    #[serde(rename = "wallet-address")]
    wallet_address: String,
}

async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<Json<Job>, ApiError> {
    let submission = Submission {
        filename: req.filename,
        submitter_id: req.submitter_id,
        metadata: req.metadata,
    };
    submit(&state, submission).await.map(Json)
}

pub async fn legacy_enqueue(
    State(state): State<AppState>,
    Query(query): Query<LegacyEnqueueQuery>,
) -> Result<Json<Job>, ApiError> {
    let submission = Submission::new(query.filename, query.wallet_address);
    submit(&state, submission).await.map(Json)
}

async fn submit(state: &AppState, submission: Submission) -> Result<Job, ApiError> {
    let new_job = submission.validate()?;
    let job = state.store.enqueue(new_job).await?;

    info!(
        job_id = %job.id,
        original_name = %job.original_name,
        storage_name = %job.storage_name,
        "Job enqueued"
    );

    if let Some(dispatch) = &state.dispatch {
        dispatch.wake();
    }
    Ok(job)
}

async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<Job>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.store.get(JobId::new(id)).await?))
}

#[cfg(test)]
mod tests {
    use crate::AppState;
    use crate::routes::router;
    use async_trait::async_trait;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use encodeq_core::executor::{ExecutionOutcome, ExecutionSpec, Executor};
    use encodeq_core::{Job, JobStatus, NameGenerator};
    use encodeq_scheduler::{DispatchSettings, Dispatcher};
    use encodeq_store::{FileJobStore, JobStore};
    use serde_json::{Value, json};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tower::ServiceExt;

    async fn recovered_store(dir: &Path) -> Arc<dyn JobStore> {
        let store = FileJobStore::new(dir.join("jobqueue"), Arc::new(NameGenerator::new()));
        store.recover().await.unwrap();
        Arc::new(store)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_returns_queued_job_with_storage_name() {
        let tmp = tempfile::tempdir().unwrap();
        let app = router(AppState::new(recovered_store(tmp.path()).await));

        let (status, body) = send(
            &app,
            post_json(
                "/api/v1/jobs",
                json!({ "filename": "clip.mp4", "submitter_id": "w1", "metadata": { "tier": 2 } }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let job: Job = serde_json::from_value(body).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.original_name, "clip.mp4");
        assert_eq!(job.submitter, "w1");
        assert_ne!(job.storage_name, "clip.mp4");
        assert!(job.storage_name.ends_with("clip.mp4"));
        assert_eq!(job.metadata, Some(json!({ "tier": 2 })));
    }

    #[tokio::test]
    async fn test_legacy_enqueue_uses_query_string() {
        let tmp = tempfile::tempdir().unwrap();
        let app = router(AppState::new(recovered_store(tmp.path()).await));

        let (status, body) = send(
            &app,
            get("/jobs/enqueue?filename=clip.mp4&wallet-address=0xabc"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["submitter"], "0xabc");
        assert_eq!(body["status"], "queued");
    }

    #[tokio::test]
    async fn test_invalid_submissions_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = recovered_store(tmp.path()).await;
        let app = router(AppState::new(store.clone()));

        let (status, body) = send(&app, get("/jobs/enqueue?filename=clip.mp4")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = send(
            &app,
            post_json(
                "/api/v1/jobs",
                json!({ "filename": "../etc/passwd", "submitter_id": "w1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, post_json("/api/v1/jobs", json!({ "submitter_id": "w1" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Nothing reached the store.
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_and_list_jobs() {
        let tmp = tempfile::tempdir().unwrap();
        let app = router(AppState::new(recovered_store(tmp.path()).await));

        for name in ["a.mp4", "b.mp4"] {
            let (status, _) = send(
                &app,
                post_json("/api/v1/jobs", json!({ "filename": name, "submitter_id": "w1" })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(&app, get("/api/v1/jobs")).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["original_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.mp4"]);

        let (status, body) = send(&app, get("/api/v1/jobs/2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["original_name"], "b.mp4");

        let (status, _) = send(&app, get("/api/v1/jobs/99")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_closed_store_reports_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = recovered_store(tmp.path()).await;
        let app = router(AppState::new(store.clone()));

        let (status, _) = send(&app, get("/health/ready")).await;
        assert_eq!(status, StatusCode::OK);

        store.close().await.unwrap();

        let (status, _) = send(
            &app,
            post_json("/api/v1/jobs", json!({ "filename": "clip.mp4", "submitter_id": "w1" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = send(&app, get("/health/ready")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "closed");

        let (status, _) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
    }

    struct FailingOn {
        needle: &'static str,
    }

    #[async_trait]
    impl Executor for FailingOn {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn run(&self, spec: &ExecutionSpec) -> encodeq_core::Result<ExecutionOutcome> {
            let now = chrono::Utc::now();
            if spec.input.to_string_lossy().contains(self.needle) {
                Ok(ExecutionOutcome::Failed {
                    started_at: now,
                    finished_at: now,
                    exit_code: Some(1),
                    message: "stub failure".to_string(),
                })
            } else {
                Ok(ExecutionOutcome::Succeeded {
                    started_at: now,
                    finished_at: now,
                })
            }
        }
    }

    async fn wait_for_status(app: &Router, id: u64, want: &str) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            let (_, body) = send(app, get(&format!("/api/v1/jobs/{}", id))).await;
            if body["status"] == want {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_submitted_jobs_reach_terminal_state() {
        let tmp = tempfile::tempdir().unwrap();
        let store = recovered_store(tmp.path()).await;
        let dispatcher = Dispatcher::start(
            store.clone(),
            Arc::new(FailingOn { needle: "broken" }),
            DispatchSettings {
                poll_interval: Duration::from_secs(60),
                incoming_dir: tmp.path().join("in"),
                outgoing_dir: tmp.path().join("out"),
                ..DispatchSettings::default()
            },
        );
        let app = router(AppState::new(store).with_dispatch(dispatcher.handle()));

        let (_, ok) = send(
            &app,
            post_json("/api/v1/jobs", json!({ "filename": "clip.mp4", "submitter_id": "w1" })),
        )
        .await;
        let (_, broken) = send(
            &app,
            post_json("/api/v1/jobs", json!({ "filename": "broken.mp4", "submitter_id": "w1" })),
        )
        .await;

        // The poll interval is a minute; only the wake-up gets these done in time.
        assert!(wait_for_status(&app, ok["id"].as_u64().unwrap(), "completed").await);
        assert!(wait_for_status(&app, broken["id"].as_u64().unwrap(), "failed").await);

        dispatcher.shutdown(Duration::from_secs(1)).await;
    }
}
