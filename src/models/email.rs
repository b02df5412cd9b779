//! Email parameters supplied by callers

use serde::Deserialize;
use validator::Validate;

use crate::utils::validation::{validate_email_address, validate_optional_url};

/// Presentation fields for a link or OTP email
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmailParams {
    #[serde(default)]
    #[validate(length(max = 256))]
    pub button_text: Option<String>,

    #[serde(default)]
    #[validate(length(max = 256))]
    pub greeting: Option<String>,

    #[serde(default, rename = "logoClickURL")]
    #[validate(length(max = 256), custom(function = "validate_optional_url"))]
    pub logo_click_url: Option<String>,

    #[serde(default, rename = "logoImageURL")]
    #[validate(length(max = 256), custom(function = "validate_optional_url"))]
    pub logo_image_url: Option<String>,

    #[validate(length(min = 5, max = 256))]
    pub service_name: String,

    #[validate(length(min = 5, max = 100))]
    pub subject: String,

    #[serde(default)]
    #[validate(length(max = 256))]
    pub sub_title: Option<String>,

    #[validate(length(min = 5, max = 256))]
    pub title: String,

    #[validate(custom(function = "validate_email_address"))]
    pub to_email: String,

    #[serde(default)]
    #[validate(length(max = 256))]
    pub to_name: Option<String>,
}
