use tonic::service::Interceptor;
use tonic::{Request, Status};

/// Metadata key the bearer token travels under.
pub const AUTHORIZATION_KEY: &str = "authorization";

/// Per-call bearer-token gate.
///
/// Runs before the service method, so an unauthenticated call never reaches
/// the validator and never spawns anything. Tokens are compared by exact
/// match and not stored beyond the configured secret.
#[derive(Debug, Clone)]
pub struct AuthInterceptor {
    token: String,
}

impl AuthInterceptor {
    pub fn new(token: String) -> Self {
        Self { token }
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let presented = request
            .metadata()
            .get(AUTHORIZATION_KEY)
            .and_then(|value| value.to_str().ok());

        match presented {
            Some(token) if token == self.token => Ok(request),
            _ => Err(Status::unauthenticated("Invalid token")),
        }
    }
}
