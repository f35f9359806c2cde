use crate::http::{ResponseBody, full_body, make_error_response};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use std::future::{Ready, ready};
use std::marker::PhantomData;

/// Serves `/health` and `/ready` on the admin listener.
///
/// `is_ready` is polled on every `/ready` request, so the probe tracks
/// whatever readiness state the owning service exposes.
pub struct AdminService<F, E> {
    is_ready: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self {
            is_ready,
            _error: PhantomData,
        }
    }

    fn respond(&self, method: &Method, path: &str) -> Response<ResponseBody> {
        if method != Method::GET {
            return make_error_response(StatusCode::METHOD_NOT_ALLOWED);
        }

        match path {
            "/health" => Response::new(full_body("ok\n")),
            "/ready" if (self.is_ready)() => Response::new(full_body("ok\n")),
            "/ready" => make_error_response(StatusCode::SERVICE_UNAVAILABLE),
            _ => make_error_response(StatusCode::NOT_FOUND),
        }
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> bool,
{
    type Response = Response<ResponseBody>;
    type Error = E;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        ready(Ok(self.respond(req.method(), req.uri().path())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(ready: bool) -> AdminService<impl Fn() -> bool, std::io::Error> {
        AdminService::new(move || ready)
    }

    #[test]
    fn test_health_always_ok() {
        let response = service(false).respond(&Method::GET, "/health");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_ready_follows_probe() {
        assert_eq!(
            service(true).respond(&Method::GET, "/ready").status(),
            StatusCode::OK
        );
        assert_eq!(
            service(false).respond(&Method::GET, "/ready").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_unknown_path_and_method() {
        let svc = service(true);
        assert_eq!(
            svc.respond(&Method::GET, "/metrics").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            svc.respond(&Method::POST, "/health").status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
