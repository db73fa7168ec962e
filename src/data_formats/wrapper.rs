use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct UserWrapper<T> {
    pub user: T,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MessageWrapper {
    pub message: String,
}

impl<T> UserWrapper<T> {
    pub fn wrap_with_user_data(request: T) -> UserWrapper<T> {
        UserWrapper { user: request }
    }
}

impl MessageWrapper {
    pub fn new(message: impl Into<String>) -> Self {
        MessageWrapper {
            message: message.into(),
        }
    }
}
