// Response bodies for the web API

use crate::storage::ObjectLocation;
use serde::Serialize;

pub const WELCOME_MESSAGE: &str = "Welcome to the Product Management!";
pub const UPLOAD_SUCCESS_MESSAGE: &str = "File uploaded successfully";

#[derive(Serialize, Debug, Clone)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: &'static str,
    pub file_path: ObjectLocation,
}

impl UploadResponse {
    pub fn new(file_path: ObjectLocation) -> Self {
        Self {
            message: UPLOAD_SUCCESS_MESSAGE,
            file_path,
        }
    }
}
