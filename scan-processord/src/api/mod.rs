pub mod push;
pub mod routes;
