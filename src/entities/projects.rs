use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub compiler: String,
    pub root_folder_id: String,
    pub root_doc_id: Option<String>,
    pub created_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::project_entries::Entity")]
    ProjectEntries,
}

impl Related<super::project_entries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProjectEntries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
