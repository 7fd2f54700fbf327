//! 类型模块：请求描述符与响应值。
//!
//! # Types Module
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RequestDescriptor`] | One outbound call: method, url, params, body, headers |
//! | [`HttpMethod`] | Supported HTTP verbs |
//! | [`ApiResponse`] | Status, lowercase headers and JSON payload of a completed call |

pub mod request;
pub mod response;

pub use request::{HttpMethod, RequestDescriptor};
pub use response::ApiResponse;
