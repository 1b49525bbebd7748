//! Synthetic creation requests, used when a caller submits no batch.

use uuid::Uuid;

use crate::domain::{Batch, CreationRequest};

/// Generate one request with a unique username, matching email and random password.
pub fn generate_user() -> CreationRequest {
    let id = Uuid::new_v4().simple().to_string();
    let username = format!("user_{}", &id[..12]);
    let email = format!("{}@example.com", username);
    let password = Uuid::new_v4().simple().to_string()[..16].to_string();
    CreationRequest::new(username, password, email)
}

/// Generate `count` requests.
pub fn generate_users(count: usize) -> Batch {
    (0..count).map(|_| generate_user()).collect()
}
