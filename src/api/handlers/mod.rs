pub mod health;
pub mod parser;
pub mod presigner;
pub mod uploads;

use serde::Deserialize;
use utoipa::IntoParams;

/// `?name=<object name>` query shared by the presigner and parser.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NameQuery {
    /// Object name chosen by the client
    pub name: String,
}
