//! Route registration over axum with a role requirement per route.
//!
//! Every request runs the same boundary: run the guard, read the body, build a
//! [`RequestContext`], call the handler (panics included) and normalize the
//! outcome.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::{Path, Request};
use axum::http::uri::PathAndQuery;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{on, MethodFilter};
use axum::Extension;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tower::util::MapRequest;
use tower::Layer;
use tracing::{debug, error, warn};

use crate::auth::{decide, Auth, Roles};
use crate::env::Env;
use crate::error::{panic_message, AppError};
use crate::middleware::response::{normalize, normalize_error, technical, Normalized};
use crate::validation::Validate;

pub mod context;
pub mod path;

pub use context::{BindError, RequestContext};
pub use path::{join_url, normalize_uri, same_path};

use self::path::route_path;

/// Default cap on buffered request bodies
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

type BoxedHandler = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, Normalized> + Send + Sync>;

/// Service handed to the transport: routes behind incoming path normalization
pub type AppService = MapRequest<axum::Router, fn(Request) -> Request>;

struct Endpoint {
    env: Arc<Env>,
    roles: Roles,
    body_limit: usize,
    handler: BoxedHandler,
}

impl Endpoint {
    async fn dispatch(
        self: Arc<Self>,
        auth: Auth,
        params: HashMap<String, String>,
        request: Request,
    ) -> Response {
        let (parts, body) = request.into_parts();

        if !decide(&auth, &self.roles).is_allowed() {
            warn!(
                "permission denied for {} ({}) on {} {}, requires {}",
                auth.id,
                auth.role,
                parts.method,
                parts.uri.path(),
                self.roles
            );
            return normalize_error(AppError::permission_denied()).into_response();
        }

        let body = match axum::body::to_bytes(body, self.body_limit).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return normalize_error(BindError::Binding(e.to_string()).into()).into_response()
            }
        };

        let rc = RequestContext::new(Arc::clone(&self.env), auth, parts.method, parts.uri)
            .with_headers(parts.headers)
            .with_params(params)
            .with_body(body);

        let handler = Arc::clone(&self.handler);
        match AssertUnwindSafe(async move { handler(rc).await })
            .catch_unwind()
            .await
        {
            Ok(normalized) => normalized.into_response(),
            Err(panic) => {
                error!("handler panicked: {}", panic_message(panic.as_ref()));
                technical("internal server error").into_response()
            }
        }
    }
}

/// Registers handlers under normalized paths, each with its role requirement
pub struct Router {
    env: Arc<Env>,
    inner: axum::Router,
    body_limit: usize,
}

macro_rules! verb_methods {
    () => {
        pub fn get<H, Fut, T>(&mut self, path: &str, handler: H) -> &mut Self
        where
            H: Fn(RequestContext) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<T, AppError>> + Send + 'static,
            T: Serialize + Send + 'static,
        {
            self.route(MethodFilter::GET, path, Roles::none(), handler)
        }

        pub fn post<H, Fut, T>(&mut self, path: &str, handler: H) -> &mut Self
        where
            H: Fn(RequestContext) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<T, AppError>> + Send + 'static,
            T: Serialize + Send + 'static,
        {
            self.route(MethodFilter::POST, path, Roles::none(), handler)
        }

        pub fn put<H, Fut, T>(&mut self, path: &str, handler: H) -> &mut Self
        where
            H: Fn(RequestContext) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<T, AppError>> + Send + 'static,
            T: Serialize + Send + 'static,
        {
            self.route(MethodFilter::PUT, path, Roles::none(), handler)
        }

        pub fn patch<H, Fut, T>(&mut self, path: &str, handler: H) -> &mut Self
        where
            H: Fn(RequestContext) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<T, AppError>> + Send + 'static,
            T: Serialize + Send + 'static,
        {
            self.route(MethodFilter::PATCH, path, Roles::none(), handler)
        }

        pub fn delete<H, Fut, T>(&mut self, path: &str, handler: H) -> &mut Self
        where
            H: Fn(RequestContext) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<T, AppError>> + Send + 'static,
            T: Serialize + Send + 'static,
        {
            self.route(MethodFilter::DELETE, path, Roles::none(), handler)
        }
    };
}

impl Router {
    pub fn new(env: Arc<Env>) -> Self {
        Self {
            env,
            inner: axum::Router::new(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Applies to routes registered afterwards
    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    verb_methods!();

    /// Registers `handler` for `method` on `path`. Registering a second method
    /// on the same path merges; the same method twice panics at startup.
    pub fn route<H, Fut, T>(
        &mut self,
        method: MethodFilter,
        path: &str,
        roles: impl Into<Roles>,
        handler: H,
    ) -> &mut Self
    where
        H: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, AppError>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let normalized = normalize_uri(path);
        let roles = roles.into();
        debug!("route {:?} {} requires {}", method, route_path(&normalized), roles);

        let boxed: BoxedHandler = Arc::new(move |rc: RequestContext| {
            let fut = handler(rc);
            async move { normalize(fut.await) }.boxed()
        });
        let endpoint = Arc::new(Endpoint {
            env: Arc::clone(&self.env),
            roles,
            body_limit: self.body_limit,
            handler: boxed,
        });

        let service = move |auth: Option<Extension<Auth>>,
                            params: Option<Path<HashMap<String, String>>>,
                            request: Request| {
            let endpoint = Arc::clone(&endpoint);
            let auth = auth.map(|Extension(a)| a).unwrap_or_default();
            let params = params.map(|Path(p)| p).unwrap_or_default();
            endpoint.dispatch(auth, params, request)
        };

        let inner = std::mem::take(&mut self.inner);
        self.inner = inner.route(route_path(&normalized), on(method, service));
        self
    }

    /// Sub-registrar under `prefix` that adds `roles` to every route
    pub fn group(&mut self, prefix: &str, roles: impl Into<Roles>) -> RouteGroup<'_> {
        RouteGroup {
            router: self,
            prefix: normalize_uri(prefix),
            roles: roles.into(),
        }
    }

    /// Routes as a plain axum router, for layering
    pub fn into_axum(self) -> axum::Router {
        self.inner.fallback(not_found)
    }

    /// Routes behind incoming path normalization
    pub fn into_service(self) -> AppService {
        normalize_incoming(self.into_axum())
    }
}

/// Typed handler: checks `roles` from inside the handler, binds `In` and
/// hands it to `cb` with the context. A denial or a bind failure ends the
/// request before `cb` runs.
///
/// ```ignore
/// router.post("/users/:id/promote", handle_with(["admin"], |input: Promote, rc| async move {
///     promote(&rc, input).await
/// }));
/// ```
pub fn handle_with<In, H, Fut, T>(
    roles: impl Into<Roles>,
    cb: H,
) -> impl Fn(RequestContext) -> BoxFuture<'static, Result<T, AppError>> + Send + Sync + 'static
where
    In: DeserializeOwned + Validate + 'static,
    H: Fn(In, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, AppError>> + Send + 'static,
    T: Send + 'static,
{
    let roles = roles.into();
    move |rc: RequestContext| {
        let ready = rc
            .check_permission(roles.clone())
            .and_then(|()| rc.should_bind::<In>());
        match ready {
            Ok(input) => cb(input, rc).boxed(),
            Err(e) => futures::future::ready(Err(e)).boxed(),
        }
    }
}

/// Wraps a router (with its layers) so incoming paths are normalized before
/// route matching.
pub fn normalize_incoming(router: axum::Router) -> AppService {
    tower::util::MapRequestLayer::new(normalize_request as fn(Request) -> Request).layer(router)
}

/// Registrar bound to a path prefix and an inherited role set
pub struct RouteGroup<'r> {
    router: &'r mut Router,
    prefix: String,
    roles: Roles,
}

impl RouteGroup<'_> {
    verb_methods!();

    pub fn route<H, Fut, T>(
        &mut self,
        method: MethodFilter,
        path: &str,
        roles: impl Into<Roles>,
        handler: H,
    ) -> &mut Self
    where
        H: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, AppError>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let full = join_url(&[self.prefix.as_str(), path]);
        let roles = self.roles.union(&roles.into());
        self.router.route(method, &full, roles, handler);
        self
    }

    /// Nested group: prefixes join, role sets union
    pub fn group(&mut self, prefix: &str, roles: impl Into<Roles>) -> RouteGroup<'_> {
        RouteGroup {
            prefix: join_url(&[self.prefix.as_str(), prefix]),
            roles: self.roles.union(&roles.into()),
            router: &mut *self.router,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn roles(&self) -> &Roles {
        &self.roles
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response()
}

fn normalize_request(mut request: Request) -> Request {
    let uri = request.uri();
    let normalized = normalize_uri(uri.path());
    let target = route_path(&normalized);
    if target == uri.path() {
        return request;
    }

    let path_and_query = match uri.query() {
        Some(query) => format!("{target}?{query}"),
        None => target.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = PathAndQuery::try_from(path_and_query).ok();
    if let Ok(rewritten) = Uri::from_parts(parts) {
        *request.uri_mut() = rewritten;
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn rewrite(uri: &str) -> String {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        normalize_request(request).uri().to_string()
    }

    #[test]
    fn incoming_paths_are_normalized() {
        assert_eq!(rewrite("/users/"), "/users");
        assert_eq!(rewrite("//users//42"), "/users/42");
        assert_eq!(rewrite("/users/?page=2"), "/users?page=2");
        assert_eq!(rewrite("/"), "/");
    }
}
