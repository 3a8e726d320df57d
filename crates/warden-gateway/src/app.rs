use axum::{
    middleware,
    routing::{get, put},
    Router,
};
use rusqlite::Connection;
use std::sync::Arc;
use warden_catalog::TaskCatalog;
use warden_core::config::WardenConfig;
use warden_scheduler::{
    AdHocExecutor, ExecutionBackend, LiveScheduler, Reconciler, RequestStore, ScheduleEngine,
    ScheduleStore,
};

use crate::http::{health, live, methods, params, requests, schedules, tasks};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: WardenConfig,
    pub catalog: Arc<TaskCatalog>,
    pub engine: ScheduleEngine,
    pub reconciler: Reconciler,
}

/// One initialised connection per store, for thread safety.
pub struct Connections {
    pub catalog: Connection,
    pub schedules: Connection,
    pub requests: Connection,
}

impl AppState {
    /// Wire the catalog, stores and engine around the given backends.
    pub fn new(
        config: WardenConfig,
        conns: Connections,
        live: Arc<dyn LiveScheduler>,
        backend: Arc<dyn ExecutionBackend>,
    ) -> Self {
        let catalog = Arc::new(TaskCatalog::new(conns.catalog));
        let store = Arc::new(ScheduleStore::new(conns.schedules));
        let requests = Arc::new(RequestStore::new(
            conns.requests,
            config.execution.request_retention_days,
        ));
        let adhoc = Arc::new(AdHocExecutor::new(backend, requests));
        let engine = ScheduleEngine::new(catalog.clone(), store.clone(), live.clone(), adhoc);
        let reconciler = Reconciler::new(
            live,
            store,
            config.live.internal_task_prefixes.clone(),
            config.display.tz(),
        );
        Self {
            config,
            catalog,
            engine,
            reconciler,
        }
    }
}

/// Assemble the full Axum router. Everything but `/health` sits behind the
/// bearer-token guard.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/execution-methods",
            get(methods::list_methods).post(methods::create_method),
        )
        .route("/execution-methods/page/{page}/{limit}", get(methods::page_methods))
        .route("/execution-methods/search/{page}/{limit}", get(methods::search_methods))
        .route(
            "/execution-methods/{key}",
            get(methods::get_method)
                .put(methods::update_method)
                .delete(methods::delete_method),
        )
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/tasks/page/{page}/{limit}", get(tasks::page_tasks))
        .route("/tasks/search/{page}/{limit}", get(tasks::search_tasks))
        .route("/tasks/{task}", get(tasks::get_task).put(tasks::update_task))
        .route("/tasks/{task}/cancel", put(tasks::cancel_task))
        .route(
            "/tasks/{task}/params",
            get(params::list_params).post(params::add_params),
        )
        .route("/tasks/{task}/params/page/{page}/{limit}", get(params::page_params))
        .route(
            "/tasks/{task}/params/{param_id}",
            put(params::update_param).delete(params::delete_param),
        )
        .route(
            "/schedules",
            get(schedules::list_schedules).post(schedules::create_schedule),
        )
        .route("/schedules/page/{page}/{limit}", get(schedules::page_schedules))
        .route("/schedules/search/{page}/{limit}", get(schedules::search_schedules))
        .route("/schedules/{schedule_id}", get(schedules::get_schedule))
        .route("/schedules/{schedule_id}/status", get(schedules::schedule_status))
        .route("/tasks/{task}/schedules", get(schedules::task_schedules))
        .route("/tasks/{task}/schedules/{live_name}", put(schedules::update_schedule))
        .route(
            "/tasks/{task}/schedules/{live_name}/cancel",
            put(schedules::cancel_schedule),
        )
        .route(
            "/tasks/{task}/schedules/{live_name}/reschedule",
            put(schedules::reschedule_schedule),
        )
        .route("/live-schedules", get(live::list_live))
        .route("/live-schedules/{*key}", get(live::live_status))
        .route("/requests", get(requests::list_requests))
        .route("/requests/page/{page}/{limit}", get(requests::page_requests))
        .route("/requests/search/{page}/{limit}", get(requests::search_requests))
        .route(
            "/tasks/{task}/requests/{request_id}/cancel",
            put(requests::cancel_request),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_token,
        ));

    Router::new()
        .route("/health", get(health::health_handler))
        .merge(api)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
