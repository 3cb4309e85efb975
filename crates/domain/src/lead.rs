//! # リード（見込み顧客）
//!
//! 問い合わせや展示会などで獲得した見込み顧客。商談が進むと顧客に変換される。
//!
//! ## ステータス遷移
//!
//! ```text
//! new ⇄ contacted ⇄ qualified ⇄ lost
//!  └──────────┴─────────┴──(convert)──→ converted（以後変更不可）
//! ```
//!
//! `converted` へは [`Lead::convert`] でのみ遷移する。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
   DomainError,
   customer::{CustomerId, CustomerInput},
   organization::OrganizationId,
   value_objects::{Email, normalize_optional_email, normalize_optional_text},
};

define_uuid_id! {
   /// リード ID
   pub struct LeadId;
}

define_validated_string! {
   /// リード名
   pub struct LeadName {
      label: "リード名",
      max_length: 200,
      pii: true,
   }
}

/// リードのステータス
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeadStatus {
   New,
   Contacted,
   Qualified,
   Converted,
   Lost,
}

impl LeadStatus {
   pub fn as_str(self) -> &'static str {
      self.into()
   }

   /// 手動のステータス変更として許されるか
   pub fn can_change_to(self, next: LeadStatus) -> bool {
      self != Self::Converted && next != Self::Converted
   }
}

impl std::str::FromStr for LeadStatus {
   type Err = DomainError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s {
         "new" => Ok(Self::New),
         "contacted" => Ok(Self::Contacted),
         "qualified" => Ok(Self::Qualified),
         "converted" => Ok(Self::Converted),
         "lost" => Ok(Self::Lost),
         _ => Err(DomainError::Validation(format!("不正なリードステータス: {s}"))),
      }
   }
}

/// リードの入力項目（未検証）
#[derive(Debug, Clone, Default)]
pub struct LeadInput {
   pub name:    String,
   pub email:   Option<String>,
   pub phone:   Option<String>,
   pub company: Option<String>,
   pub source:  Option<String>,
   pub notes:   Option<String>,
}

/// 検証済みのリードプロフィール
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadProfile {
   pub name:    LeadName,
   pub email:   Option<Email>,
   pub phone:   Option<String>,
   pub company: Option<String>,
   pub source:  Option<String>,
   pub notes:   Option<String>,
}

impl TryFrom<LeadInput> for LeadProfile {
   type Error = DomainError;

   fn try_from(input: LeadInput) -> Result<Self, Self::Error> {
      Ok(Self {
         name:    LeadName::new(input.name)?,
         email:   normalize_optional_email(input.email)?,
         phone:   normalize_optional_text(input.phone, "電話番号", 50)?,
         company: normalize_optional_text(input.company, "会社名", 200)?,
         source:  normalize_optional_text(input.source, "獲得経路", 100)?,
         notes:   normalize_optional_text(input.notes, "メモ", 10_000)?,
      })
   }
}

/// リードエンティティ
#[derive(Debug, Clone)]
pub struct Lead {
   id:                    LeadId,
   organization_id:       OrganizationId,
   profile:               LeadProfile,
   status:                LeadStatus,
   converted_customer_id: Option<CustomerId>,
   converted_at:          Option<DateTime<Utc>>,
   created_at:            DateTime<Utc>,
   updated_at:            DateTime<Utc>,
}

impl Lead {
   pub fn new(
      id: LeadId,
      organization_id: OrganizationId,
      profile: LeadProfile,
      now: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         organization_id,
         profile,
         status: LeadStatus::New,
         converted_customer_id: None,
         converted_at: None,
         created_at: now,
         updated_at: now,
      }
   }

   #[allow(clippy::too_many_arguments)]
   pub fn from_db(
      id: LeadId,
      organization_id: OrganizationId,
      profile: LeadProfile,
      status: LeadStatus,
      converted_customer_id: Option<CustomerId>,
      converted_at: Option<DateTime<Utc>>,
      created_at: DateTime<Utc>,
      updated_at: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         organization_id,
         profile,
         status,
         converted_customer_id,
         converted_at,
         created_at,
         updated_at,
      }
   }

   fn ensure_editable(&self) -> Result<(), DomainError> {
      if self.status == LeadStatus::Converted {
         return Err(DomainError::Conflict(
            "顧客に変換済みのリードは変更できません".to_string(),
         ));
      }
      Ok(())
   }

   /// プロフィールを更新する
   pub fn with_profile(self, profile: LeadProfile, now: DateTime<Utc>) -> Result<Self, DomainError> {
      self.ensure_editable()?;
      Ok(Self {
         profile,
         updated_at: now,
         ..self
      })
   }

   /// ステータスを変更する
   pub fn change_status(self, next: LeadStatus, now: DateTime<Utc>) -> Result<Self, DomainError> {
      self.ensure_editable()?;
      if !self.status.can_change_to(next) {
         return Err(DomainError::Validation(
            "converted へは変換操作でのみ遷移できます".to_string(),
         ));
      }
      Ok(Self {
         status: next,
         updated_at: now,
         ..self
      })
   }

   /// 顧客への変換を記録する
   pub fn convert(self, customer_id: CustomerId, now: DateTime<Utc>) -> Result<Self, DomainError> {
      if self.status == LeadStatus::Converted {
         return Err(DomainError::Conflict(
            "このリードは既に顧客に変換されています".to_string(),
         ));
      }
      Ok(Self {
         status: LeadStatus::Converted,
         converted_customer_id: Some(customer_id),
         converted_at: Some(now),
         updated_at: now,
         ..self
      })
   }

   /// 変換先の顧客の入力項目を組み立てる
   ///
   /// 獲得経路はメモの先頭に残す。
   pub fn to_customer_input(&self) -> CustomerInput {
      let notes = match (&self.profile.source, &self.profile.notes) {
         (Some(source), Some(notes)) => Some(format!("獲得経路: {source}\n{notes}")),
         (Some(source), None) => Some(format!("獲得経路: {source}")),
         (None, notes) => notes.clone(),
      };
      CustomerInput {
         name: self.profile.name.as_str().to_string(),
         email: self.profile.email.as_ref().map(|e| e.as_str().to_string()),
         phone: self.profile.phone.clone(),
         company: self.profile.company.clone(),
         city: None,
         category: None,
         notes,
      }
   }

   pub fn id(&self) -> &LeadId {
      &self.id
   }

   pub fn organization_id(&self) -> &OrganizationId {
      &self.organization_id
   }

   pub fn profile(&self) -> &LeadProfile {
      &self.profile
   }

   pub fn status(&self) -> LeadStatus {
      self.status
   }

   pub fn converted_customer_id(&self) -> Option<&CustomerId> {
      self.converted_customer_id.as_ref()
   }

   pub fn converted_at(&self) -> Option<DateTime<Utc>> {
      self.converted_at
   }

   pub fn created_at(&self) -> DateTime<Utc> {
      self.created_at
   }

   pub fn updated_at(&self) -> DateTime<Utc> {
      self.updated_at
   }
}

#[cfg(test)]
mod tests {
   use rstest::rstest;

   use super::*;

   fn lead() -> Lead {
      let profile = LeadProfile::try_from(LeadInput {
         name: "佐藤 花子".to_string(),
         email: Some("Hanako@Example.com".to_string()),
         source: Some("展示会".to_string()),
         notes: Some("来月再訪".to_string()),
         ..LeadInput::default()
      })
      .unwrap();
      Lead::new(LeadId::new(), OrganizationId::new(), profile, Utc::now())
   }

   #[rstest]
   #[case(LeadStatus::New, LeadStatus::Contacted, true)]
   #[case(LeadStatus::Lost, LeadStatus::New, true)]
   #[case(LeadStatus::Qualified, LeadStatus::Converted, false)]
   #[case(LeadStatus::Converted, LeadStatus::New, false)]
   fn test_手動のステータス変更(#[case] from: LeadStatus, #[case] to: LeadStatus, #[case] expected: bool) {
      assert_eq!(from.can_change_to(to), expected);
   }

   #[test]
   fn test_新規リードはnewで作成される() {
      assert_eq!(lead().status(), LeadStatus::New);
   }

   #[test]
   fn test_変換すると顧客idが記録される() {
      let customer_id = CustomerId::new();
      let converted = lead().convert(customer_id.clone(), Utc::now()).unwrap();

      assert_eq!(converted.status(), LeadStatus::Converted);
      assert_eq!(converted.converted_customer_id(), Some(&customer_id));
      assert!(converted.converted_at().is_some());
   }

   #[test]
   fn test_二重変換は競合になる() {
      let converted = lead().convert(CustomerId::new(), Utc::now()).unwrap();
      let result = converted.convert(CustomerId::new(), Utc::now());
      assert!(matches!(result, Err(DomainError::Conflict(_))));
   }

   #[test]
   fn test_変換済みリードは編集できない() {
      let converted = lead().convert(CustomerId::new(), Utc::now()).unwrap();
      let result = converted.change_status(LeadStatus::Lost, Utc::now());
      assert!(matches!(result, Err(DomainError::Conflict(_))));
   }

   #[test]
   fn test_顧客入力には獲得経路がメモとして残る() {
      let input = lead().to_customer_input();

      assert_eq!(input.name, "佐藤 花子");
      assert_eq!(input.email.as_deref(), Some("hanako@example.com"));
      assert_eq!(input.notes.as_deref(), Some("獲得経路: 展示会\n来月再訪"));
   }

   #[test]
   fn test_ステータスは文字列と相互変換できる() {
      assert_eq!("qualified".parse::<LeadStatus>().unwrap(), LeadStatus::Qualified);
      assert_eq!(LeadStatus::Lost.as_str(), "lost");
   }
}
