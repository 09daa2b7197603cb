use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const KIND_FOLDER: &str = "folder";
pub const KIND_DOC: &str = "doc";
pub const KIND_FILE: &str = "file";

/// A folder, editable doc or binary file in a project's tree
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "project_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub project_id: String,
    /// None only for a project's root folder
    pub parent_id: Option<String>,
    pub kind: String,
    pub name: String,
    /// Text of a doc
    #[sea_orm(column_type = "Text", nullable)]
    pub content: Option<String>,
    /// Object key of a binary file
    pub s3_key: Option<String>,
    pub size: i64,
    pub linked_file_data: Option<Json>,
    pub created_at: Option<DateTimeUtc>,
    pub updated_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::projects::Entity",
        from = "Column::ProjectId",
        to = "super::projects::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Projects,
}

impl Related<super::projects::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Projects.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
