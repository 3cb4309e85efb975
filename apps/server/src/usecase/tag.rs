//! # タグユースケース

use std::sync::Arc;

use kokyaku_domain::{
   clock::Clock,
   organization::OrganizationId,
   tag::{Tag, TagColor, TagId, TagName},
};
use kokyaku_infra::repository::{TagRepository, TagWithCount};

use crate::error::ApiError;

/// タグユースケース
pub struct TagUseCaseImpl {
   tags:  Arc<dyn TagRepository>,
   clock: Arc<dyn Clock>,
}

impl TagUseCaseImpl {
   pub fn new(tags: Arc<dyn TagRepository>, clock: Arc<dyn Clock>) -> Self {
      Self { tags, clock }
   }

   pub async fn list(&self, organization_id: &OrganizationId) -> Result<Vec<TagWithCount>, ApiError> {
      Ok(self.tags.list_with_counts(organization_id).await?)
   }

   /// 色を省略した場合は既定色になる
   pub async fn create(
      &self,
      organization_id: &OrganizationId,
      name: String,
      color: Option<String>,
   ) -> Result<Tag, ApiError> {
      let tag = Tag::new(
         TagId::new(),
         organization_id.clone(),
         TagName::new(name)?,
         TagColor::or_default(color)?,
         self.clock.now(),
      );
      self.tags.insert(&tag).await?;
      Ok(tag)
   }

   pub async fn update(
      &self,
      organization_id: &OrganizationId,
      id: &TagId,
      name: String,
      color: Option<String>,
   ) -> Result<Tag, ApiError> {
      let current = self
         .tags
         .find_by_id(organization_id, id)
         .await?
         .ok_or_else(|| ApiError::NotFound(format!("タグが見つかりません: {id}")))?;
      let color = match color {
         Some(color) => TagColor::new(color)?,
         None => current.color().clone(),
      };
      let tag = current.with_name_and_color(TagName::new(name)?, color);
      self.tags.update(&tag).await?;
      Ok(tag)
   }

   /// 削除する。顧客へのタグ付けも外れる
   pub async fn delete(&self, organization_id: &OrganizationId, id: &TagId) -> Result<(), ApiError> {
      if !self.tags.delete(organization_id, id).await? {
         return Err(ApiError::NotFound(format!("タグが見つかりません: {id}")));
      }
      Ok(())
   }
}
