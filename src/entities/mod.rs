pub mod prelude;

pub mod project_entries;
pub mod projects;
