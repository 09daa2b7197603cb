pub use super::project_entries::Entity as ProjectEntries;
pub use super::projects::Entity as Projects;
