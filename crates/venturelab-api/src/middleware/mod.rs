pub mod security;

pub use security::{
    cors_layer, extract_client_ip, ip_guard_middleware, security_headers_middleware, IpGuard,
};
