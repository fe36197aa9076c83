use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub mod admin;
pub mod config;
pub mod events;
pub mod gate;
pub mod media;
pub mod multipart;
pub mod registrations;
pub mod schema;
pub mod state;
pub mod storage;
pub mod students;
pub mod template;
pub mod util_resp;
pub mod validation;
pub mod widgets;

#[cfg(test)]
mod test;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
