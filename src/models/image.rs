// Image aggregate model
// An image row plus its variant rows and tag links. The upload pipeline
// walks the aggregate through processing -> active; deletion is soft and
// hides the image from everyone but its owner.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::schema::{image_tags, image_variants, images, tags};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageStatus {
    Processing,
    Active,
    Flagged,
    Deleted,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Processing => "processing",
            ImageStatus::Active => "active",
            ImageStatus::Flagged => "flagged",
            ImageStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for ImageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(ImageStatus::Processing),
            "active" => Ok(ImageStatus::Active),
            "flagged" => Ok(ImageStatus::Flagged),
            "deleted" => Ok(ImageStatus::Deleted),
            other => Err(format!("Invalid image status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageVisibility {
    Public,
    Unlisted,
    Private,
}

impl ImageVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageVisibility::Public => "public",
            ImageVisibility::Unlisted => "unlisted",
            ImageVisibility::Private => "private",
        }
    }
}

impl FromStr for ImageVisibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(ImageVisibility::Public),
            "unlisted" => Ok(ImageVisibility::Unlisted),
            "private" => Ok(ImageVisibility::Private),
            other => Err(format!("Invalid visibility: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = images)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Image {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub status: String,
    pub visibility: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub mime_type: String,
    pub file_size: i64,
    pub width: i32,
    pub height: i32,
    pub original_filename: String,
    pub storage_key: String,
    pub storage_provider: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = images)]
pub struct NewImage {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub status: String,
    pub visibility: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub mime_type: String,
    pub file_size: i64,
    pub width: i32,
    pub height: i32,
    pub original_filename: String,
    pub storage_key: String,
    pub storage_provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = image_variants)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ImageVariantRow {
    pub id: Uuid,
    pub image_id: Uuid,
    pub variant: String,
    pub storage_key: String,
    pub width: i32,
    pub height: i32,
    pub file_size: i64,
    pub format: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = image_variants)]
pub struct NewImageVariant {
    pub image_id: Uuid,
    pub variant: String,
    pub storage_key: String,
    pub width: i32,
    pub height: i32,
    pub file_size: i64,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = tags)]
pub struct Tag {
    pub id: Uuid,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("Database error: {0}")]
    Database(diesel::result::Error),

    #[error("Image not found")]
    NotFound,

    #[error("Duplicate variant for image")]
    DuplicateVariant,
}

impl From<diesel::result::Error> for ImageError {
    fn from(err: diesel::result::Error) -> Self {
        match &err {
            diesel::result::Error::NotFound => ImageError::NotFound,
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            ) if info.constraint_name() == Some("image_variants_unique") => {
                ImageError::DuplicateVariant
            },
            _ => ImageError::Database(err),
        }
    }
}

impl Image {
    pub fn status(&self) -> ImageStatus {
        self.status.parse().unwrap_or(ImageStatus::Deleted)
    }

    pub fn visibility(&self) -> ImageVisibility {
        self.visibility.parse().unwrap_or(ImageVisibility::Private)
    }

    /// Whether `viewer` may see this image at all.
    pub fn visible_to(&self, viewer: Option<Uuid>) -> bool {
        if self.status() == ImageStatus::Deleted {
            return viewer == Some(self.owner_id);
        }
        match self.visibility() {
            ImageVisibility::Public | ImageVisibility::Unlisted => true,
            ImageVisibility::Private => viewer == Some(self.owner_id),
        }
    }

    pub async fn create(
        conn: &mut AsyncPgConnection,
        new_image: NewImage,
    ) -> Result<Self, ImageError> {
        diesel::insert_into(images::table)
            .values(&new_image)
            .get_result::<Image>(conn)
            .await
            .map_err(ImageError::from)
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        image_id: Uuid,
    ) -> Result<Self, ImageError> {
        images::table
            .find(image_id)
            .first::<Image>(conn)
            .await
            .map_err(ImageError::from)
    }

    pub async fn set_status(
        conn: &mut AsyncPgConnection,
        image_id: Uuid,
        new_status: ImageStatus,
    ) -> Result<(), ImageError> {
        use crate::schema::images::dsl::*;

        let updated = diesel::update(images.find(image_id))
            .set((status.eq(new_status.as_str()), updated_at.eq(Utc::now())))
            .execute(conn)
            .await
            .map_err(ImageError::from)?;

        if updated == 0 {
            return Err(ImageError::NotFound);
        }
        Ok(())
    }

    pub async fn update_metadata(
        conn: &mut AsyncPgConnection,
        image_id: Uuid,
        new_title: Option<String>,
        new_description: Option<String>,
        new_visibility: Option<ImageVisibility>,
    ) -> Result<Self, ImageError> {
        use crate::schema::images::dsl::*;

        // Build the changeset from whichever fields were supplied.
        let current = Self::find_by_id(conn, image_id).await?;
        diesel::update(images.find(image_id))
            .set((
                title.eq(new_title.or(current.title)),
                description.eq(new_description.or(current.description)),
                visibility.eq(new_visibility
                    .map(|v| v.as_str().to_string())
                    .unwrap_or(current.visibility)),
                updated_at.eq(Utc::now()),
            ))
            .get_result::<Image>(conn)
            .await
            .map_err(ImageError::from)
    }

    /// Owner's images, all statuses except hard-hidden ones for others.
    pub async fn list_for_owner(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, ImageError> {
        use crate::schema::images::dsl::*;

        images
            .filter(owner_id.eq(owner))
            .filter(status.ne(ImageStatus::Deleted.as_str()))
            .order(created_at.desc())
            .limit(limit)
            .offset(offset)
            .load::<Image>(conn)
            .await
            .map_err(ImageError::from)
    }

    /// Public gallery listing: active, public images only.
    pub async fn list_public(
        conn: &mut AsyncPgConnection,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, ImageError> {
        use crate::schema::images::dsl::*;

        images
            .filter(status.eq(ImageStatus::Active.as_str()))
            .filter(visibility.eq(ImageVisibility::Public.as_str()))
            .order(created_at.desc())
            .limit(limit)
            .offset(offset)
            .load::<Image>(conn)
            .await
            .map_err(ImageError::from)
    }

    pub async fn attach_variant(
        conn: &mut AsyncPgConnection,
        new_variant: NewImageVariant,
    ) -> Result<ImageVariantRow, ImageError> {
        diesel::insert_into(image_variants::table)
            .values(&new_variant)
            .get_result::<ImageVariantRow>(conn)
            .await
            .map_err(ImageError::from)
    }

    pub async fn variants(
        conn: &mut AsyncPgConnection,
        image_id_val: Uuid,
    ) -> Result<Vec<ImageVariantRow>, ImageError> {
        use crate::schema::image_variants::dsl::*;

        image_variants
            .filter(image_id.eq(image_id_val))
            .order(variant.asc())
            .load::<ImageVariantRow>(conn)
            .await
            .map_err(ImageError::from)
    }

    pub async fn find_variant(
        conn: &mut AsyncPgConnection,
        image_id_val: Uuid,
        variant_name: &str,
    ) -> Result<ImageVariantRow, ImageError> {
        use crate::schema::image_variants::dsl::*;

        image_variants
            .filter(image_id.eq(image_id_val))
            .filter(variant.eq(variant_name))
            .first::<ImageVariantRow>(conn)
            .await
            .map_err(ImageError::from)
    }

    /// Upsert tags by slug and link them to the image.
    pub async fn set_tags(
        conn: &mut AsyncPgConnection,
        image_id_val: Uuid,
        slugs: &[String],
    ) -> Result<(), ImageError> {
        for slug_val in slugs {
            let tag: Tag = diesel::insert_into(tags::table)
                .values(tags::slug.eq(slug_val))
                .on_conflict(tags::slug)
                .do_update()
                .set(tags::slug.eq(slug_val))
                .get_result::<Tag>(conn)
                .await
                .map_err(ImageError::from)?;

            diesel::insert_into(image_tags::table)
                .values((
                    image_tags::image_id.eq(image_id_val),
                    image_tags::tag_id.eq(tag.id),
                ))
                .on_conflict_do_nothing()
                .execute(conn)
                .await
                .map_err(ImageError::from)?;
        }
        Ok(())
    }

    pub async fn tags(
        conn: &mut AsyncPgConnection,
        image_id_val: Uuid,
    ) -> Result<Vec<String>, ImageError> {
        image_tags::table
            .inner_join(tags::table)
            .filter(image_tags::image_id.eq(image_id_val))
            .select(tags::slug)
            .order(tags::slug.asc())
            .load::<String>(conn)
            .await
            .map_err(ImageError::from)
    }
}

impl ImageVariantRow {
    pub fn content_type(&self) -> &'static str {
        match self.format.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "gif" => "image/gif",
            "webp" => "image/webp",
            _ => "application/octet-stream",
        }
    }
}
