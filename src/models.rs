use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = crate::schema::comments)]
pub struct Comment {
    #[schema(example = 42)]
    pub id: i32,
    #[schema(example = "reader@example.com")]
    pub email: String,
    #[schema(example = "Great article!")]
    pub comment: String,
    #[schema(example = 7)]
    pub content_id: i32,
}

#[derive(Debug, Clone, Insertable, Deserialize, Serialize, Validate, ToSchema)]
#[diesel(table_name = crate::schema::comments)]
pub struct NewComment {
    #[validate(
        email(message = "Invalid email format"),
        length(max = 320, message = "Email must be at most 320 characters")
    )]
    #[schema(example = "reader@example.com")]
    pub email: String,
    #[schema(example = "Great article!")]
    pub comment: String,
    #[schema(example = 7)]
    pub content_id: i32,
}

impl NewComment {
    pub fn into_comment(self, id: i32) -> Comment {
        Comment {
            id,
            email: self.email,
            comment: self.comment,
            content_id: self.content_id,
        }
    }
}
