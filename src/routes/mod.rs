pub mod cleanup;
pub mod subscription;
pub mod webhooks;
