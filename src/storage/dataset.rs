//! Committed record set and the staged unit of work over it.
//!
//! Backends keep (or load) a [`Dataset`], open a [`Transaction`] on it,
//! hand the transaction to the caller's closure, and on success fold the
//! resulting [`Changes`] back in with [`Dataset::apply`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EduPerksError, Result};
use crate::models::{
    AuditLogEntry, Merchant, MerchantId, Offer, OfferId, Redemption, RedemptionId, Student,
    StudentId, UserId,
};

/// All committed marketplace records.
///
/// Serializes as one JSON document with a list per entity kind, so a
/// backend can persist the whole set in a single atomic write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Records", into = "Records")]
pub struct Dataset {
    /// Offers by ID.
    offers: HashMap<OfferId, Offer>,
    /// Students by ID.
    students: HashMap<StudentId, Student>,
    /// Merchants by ID.
    merchants: HashMap<MerchantId, Merchant>,
    /// Redemptions by ID.
    redemptions: HashMap<RedemptionId, Redemption>,
    /// Unique index over `(offer_id, student_id)`.
    pairs: HashMap<(OfferId, StudentId), RedemptionId>,
    /// Unique index over student `user_id`.
    student_users: HashMap<UserId, StudentId>,
    /// Unique index over merchant `user_id`.
    merchant_users: HashMap<UserId, MerchantId>,
    /// Audit trail in append order.
    audit_log: Vec<AuditLogEntry>,
}

/// On-disk layout of a [`Dataset`].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Records {
    /// Stored offers.
    #[serde(default)]
    offers: Vec<Offer>,
    /// Stored students.
    #[serde(default)]
    students: Vec<Student>,
    /// Stored merchants.
    #[serde(default)]
    merchants: Vec<Merchant>,
    /// Stored redemptions.
    #[serde(default)]
    redemptions: Vec<Redemption>,
    /// Stored audit trail.
    #[serde(default)]
    audit_log: Vec<AuditLogEntry>,
}

/// Writes staged by a [`Transaction`], not yet committed.
#[derive(Debug, Default)]
pub struct Changes {
    /// Inserted or updated offers.
    offers: HashMap<OfferId, Offer>,
    /// Inserted or updated students.
    students: HashMap<StudentId, Student>,
    /// Inserted or updated merchants.
    merchants: HashMap<MerchantId, Merchant>,
    /// Inserted or updated redemptions.
    redemptions: HashMap<RedemptionId, Redemption>,
    /// Appended audit entries.
    audit_log: Vec<AuditLogEntry>,
}

impl Changes {
    /// Returns `true` if nothing was staged.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
            && self.students.is_empty()
            && self.merchants.is_empty()
            && self.redemptions.is_empty()
            && self.audit_log.is_empty()
    }
}

impl Dataset {
    /// Creates an empty dataset.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a unit of work reading from this dataset.
    #[inline]
    #[must_use]
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction {
            base: self,
            changes: Changes::default(),
        }
    }

    /// Commits staged writes.
    #[inline]
    pub fn apply(&mut self, changes: Changes) {
        for (id, offer) in changes.offers {
            let _old = self.offers.insert(id, offer);
        }
        for (id, student) in changes.students {
            reindex_user(
                &mut self.student_users,
                self.students.get(&id).map(|old| &old.user_id),
                &student.user_id,
                &id,
            );
            let _old = self.students.insert(id, student);
        }
        for (id, merchant) in changes.merchants {
            reindex_user(
                &mut self.merchant_users,
                self.merchants.get(&id).map(|old| &old.user_id),
                &merchant.user_id,
                &id,
            );
            let _old = self.merchants.insert(id, merchant);
        }
        for (id, redemption) in changes.redemptions {
            let pair = (redemption.offer_id.clone(), redemption.student_id.clone());
            let _old_pair = self.pairs.insert(pair, id.clone());
            let _old = self.redemptions.insert(id, redemption);
        }
        self.audit_log.extend(changes.audit_log);
    }

    /// Offers ordered by creation time.
    #[inline]
    #[must_use]
    pub fn offers(&self) -> Vec<Offer> {
        let mut offers: Vec<Offer> = self.offers.values().cloned().collect();
        offers.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        offers
    }

    /// Students ordered by ID.
    #[inline]
    #[must_use]
    pub fn students(&self) -> Vec<Student> {
        sorted_by_key(&self.students)
    }

    /// Merchants ordered by ID.
    #[inline]
    #[must_use]
    pub fn merchants(&self) -> Vec<Merchant> {
        sorted_by_key(&self.merchants)
    }

    /// Redemptions ordered by issuance time.
    #[inline]
    #[must_use]
    pub fn redemptions(&self) -> Vec<Redemption> {
        let mut redemptions: Vec<Redemption> = self.redemptions.values().cloned().collect();
        redemptions.sort_by(|left, right| {
            left.issued_at
                .cmp(&right.issued_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        redemptions
    }

    /// Audit trail in append order.
    #[inline]
    #[must_use]
    pub fn audit_log(&self) -> &[AuditLogEntry] {
        &self.audit_log
    }
}

impl From<Records> for Dataset {
    #[inline]
    fn from(records: Records) -> Self {
        let mut dataset = Self::default();
        dataset.apply(Changes {
            offers: records
                .offers
                .into_iter()
                .map(|offer| (offer.id.clone(), offer))
                .collect(),
            students: records
                .students
                .into_iter()
                .map(|student| (student.id.clone(), student))
                .collect(),
            merchants: records
                .merchants
                .into_iter()
                .map(|merchant| (merchant.id.clone(), merchant))
                .collect(),
            redemptions: records
                .redemptions
                .into_iter()
                .map(|redemption| (redemption.id.clone(), redemption))
                .collect(),
            audit_log: records.audit_log,
        });
        dataset
    }
}

impl From<Dataset> for Records {
    #[inline]
    fn from(dataset: Dataset) -> Self {
        Self {
            offers: dataset.offers(),
            students: dataset.students(),
            merchants: dataset.merchants(),
            redemptions: dataset.redemptions(),
            audit_log: dataset.audit_log,
        }
    }
}

/// A unit of work: reads see staged writes first, then committed records.
#[derive(Debug)]
pub struct Transaction<'data> {
    /// Committed records.
    base: &'data Dataset,
    /// Writes staged so far.
    changes: Changes,
}

impl Transaction<'_> {
    /// Looks up an offer.
    #[inline]
    #[must_use]
    pub fn offer(&self, id: &OfferId) -> Option<&Offer> {
        self.changes
            .offers
            .get(id)
            .or_else(|| self.base.offers.get(id))
    }

    /// Looks up a student.
    #[inline]
    #[must_use]
    pub fn student(&self, id: &StudentId) -> Option<&Student> {
        self.changes
            .students
            .get(id)
            .or_else(|| self.base.students.get(id))
    }

    /// Looks up a merchant.
    #[inline]
    #[must_use]
    pub fn merchant(&self, id: &MerchantId) -> Option<&Merchant> {
        self.changes
            .merchants
            .get(id)
            .or_else(|| self.base.merchants.get(id))
    }

    /// Looks up a redemption.
    #[inline]
    #[must_use]
    pub fn redemption(&self, id: &RedemptionId) -> Option<&Redemption> {
        self.changes
            .redemptions
            .get(id)
            .or_else(|| self.base.redemptions.get(id))
    }

    /// Finds the merchant profile owned by a user.
    #[inline]
    #[must_use]
    pub fn merchant_by_user(&self, user_id: &UserId) -> Option<&Merchant> {
        self.changes
            .merchants
            .values()
            .find(|merchant| merchant.user_id == *user_id)
            .or_else(|| {
                self.base
                    .merchant_users
                    .get(user_id)
                    .and_then(|id| self.merchant(id))
                    .filter(|merchant| merchant.user_id == *user_id)
            })
    }

    /// Finds the student profile owned by a user.
    #[inline]
    #[must_use]
    pub fn student_by_user(&self, user_id: &UserId) -> Option<&Student> {
        self.changes
            .students
            .values()
            .find(|student| student.user_id == *user_id)
            .or_else(|| {
                self.base
                    .student_users
                    .get(user_id)
                    .and_then(|id| self.student(id))
                    .filter(|student| student.user_id == *user_id)
            })
    }

    /// Finds the redemption held by `student_id` for `offer_id`.
    #[inline]
    #[must_use]
    pub fn redemption_for(
        &self,
        offer_id: &OfferId,
        student_id: &StudentId,
    ) -> Option<&Redemption> {
        let staged = self.changes.redemptions.values().find(|redemption| {
            redemption.offer_id == *offer_id && redemption.student_id == *student_id
        });
        staged.or_else(|| {
            self.base
                .pairs
                .get(&(offer_id.clone(), student_id.clone()))
                .and_then(|id| self.redemption(id))
        })
    }

    /// Stages an offer insert or update.
    #[inline]
    pub fn put_offer(&mut self, offer: Offer) {
        let _old = self.changes.offers.insert(offer.id.clone(), offer);
    }

    /// Stages a student insert or update.
    ///
    /// # Errors
    ///
    /// Returns [`EduPerksError::Storage`] if another student profile
    /// belongs to the same user.
    #[inline]
    pub fn put_student(&mut self, student: Student) -> Result<()> {
        if let Some(owner) = self.student_by_user(&student.user_id)
            && owner.id != student.id
        {
            return Err(user_taken("student", &student.user_id, &owner.id));
        }
        let _old = self.changes.students.insert(student.id.clone(), student);
        Ok(())
    }

    /// Stages a merchant insert or update.
    ///
    /// # Errors
    ///
    /// Returns [`EduPerksError::Storage`] if another merchant profile
    /// belongs to the same user.
    #[inline]
    pub fn put_merchant(&mut self, merchant: Merchant) -> Result<()> {
        if let Some(owner) = self.merchant_by_user(&merchant.user_id)
            && owner.id != merchant.id
        {
            return Err(user_taken("merchant", &merchant.user_id, &owner.id));
        }
        let _old = self.changes.merchants.insert(merchant.id.clone(), merchant);
        Ok(())
    }

    /// Stages a redemption insert or update.
    ///
    /// # Errors
    ///
    /// Returns [`EduPerksError::Storage`] if a different redemption already
    /// exists for the same offer and student.
    #[inline]
    pub fn put_redemption(&mut self, redemption: Redemption) -> Result<()> {
        if let Some(existing) = self.redemption_for(&redemption.offer_id, &redemption.student_id)
            && existing.id != redemption.id
        {
            return Err(EduPerksError::Storage(
                format!(
                    "unique constraint violated: student {} already holds redemption {} for offer {}",
                    redemption.student_id, existing.id, redemption.offer_id
                )
                .into(),
            ));
        }
        let _old = self
            .changes
            .redemptions
            .insert(redemption.id.clone(), redemption);
        Ok(())
    }

    /// Stages an audit entry.
    #[inline]
    pub fn append_audit(&mut self, entry: AuditLogEntry) {
        self.changes.audit_log.push(entry);
    }

    /// Ends the unit of work, returning its staged writes.
    #[inline]
    #[must_use]
    pub fn into_changes(self) -> Changes {
        self.changes
    }
}

/// Moves `id`'s entry in a user index from `previous` to `current`.
fn reindex_user<K: Clone + Eq>(
    index: &mut HashMap<UserId, K>,
    previous: Option<&UserId>,
    current: &UserId,
    id: &K,
) {
    if let Some(old_user) = previous
        && old_user != current
        && index.get(old_user) == Some(id)
    {
        let _stale = index.remove(old_user);
    }
    let _old = index.insert(current.clone(), id.clone());
}

/// Unique constraint error for a second profile of one user.
fn user_taken<T: core::fmt::Display>(entity: &str, user_id: &UserId, holder: &T) -> EduPerksError {
    EduPerksError::Storage(
        format!("unique constraint violated: user {user_id} already owns {entity} {holder}").into(),
    )
}

/// Map values ordered by key.
fn sorted_by_key<K: Ord, V: Clone>(map: &HashMap<K, V>) -> Vec<V> {
    let mut entries: Vec<(&K, &V)> = map.iter().collect();
    entries.sort_by(|left, right| left.0.cmp(right.0));
    entries.into_iter().map(|(_, value)| value.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KycStatus, RedemptionMethod, RedemptionStatus, VerificationStatus};
    use chrono::{DateTime, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn merchant(id: &str, user: &str) -> Merchant {
        Merchant {
            id: MerchantId::from(id),
            user_id: UserId::from(user),
            legal_name: "Cafe Ltd".to_owned(),
            trade_name: "Cafe".to_owned(),
            kyc_status: KycStatus::Pending,
        }
    }

    fn student(id: &str, user: &str) -> Student {
        Student {
            id: StudentId::from(id),
            user_id: UserId::from(user),
            name: None,
            email: format!("{id}@uni.example"),
            verification_status: VerificationStatus::Verified,
        }
    }

    fn redemption(id: &str, offer: &str, student_id: &str, issued: i64) -> Redemption {
        Redemption {
            id: RedemptionId::from(id),
            offer_id: OfferId::from(offer),
            student_id: StudentId::from(student_id),
            coupon_code: format!("EDU-{id}"),
            method: RedemptionMethod::Code,
            status: RedemptionStatus::Issued,
            issued_at: ts(issued),
            redeemed_at: None,
            verified_by: None,
        }
    }

    #[test]
    fn reads_see_staged_writes_before_commit() {
        let dataset = Dataset::new();
        let mut tx = dataset.transaction();
        assert!(tx.merchant(&MerchantId::from("m-1")).is_none());
        tx.put_merchant(merchant("m-1", "u-1")).unwrap();
        assert!(tx.merchant(&MerchantId::from("m-1")).is_some());
        assert_eq!(
            tx.merchant_by_user(&UserId::from("u-1")).unwrap().id,
            MerchantId::from("m-1")
        );
        // Nothing reaches the dataset until the changes are applied.
        assert!(dataset.merchants().is_empty());
    }

    #[test]
    fn apply_commits_all_staged_writes() {
        let mut dataset = Dataset::new();
        let mut tx = dataset.transaction();
        tx.put_student(student("s-1", "u-1")).unwrap();
        tx.put_redemption(redemption("r-1", "o-1", "s-1", 10)).unwrap();
        let changes = tx.into_changes();
        assert!(!changes.is_empty());
        dataset.apply(changes);

        let reopened = dataset.transaction();
        assert!(reopened.student_by_user(&UserId::from("u-1")).is_some());
        assert_eq!(
            reopened
                .redemption_for(&OfferId::from("o-1"), &StudentId::from("s-1"))
                .unwrap()
                .id,
            RedemptionId::from("r-1")
        );
        assert!(reopened.into_changes().is_empty());
    }

    #[test]
    fn staged_update_shadows_committed_record() {
        let mut dataset = Dataset::new();
        let mut setup = dataset.transaction();
        setup.put_merchant(merchant("m-1", "u-1")).unwrap();
        let changes = setup.into_changes();
        dataset.apply(changes);

        let mut tx = dataset.transaction();
        let mut approved = merchant("m-1", "u-1");
        approved.kyc_status = KycStatus::Approved;
        tx.put_merchant(approved).unwrap();
        assert!(tx.merchant_by_user(&UserId::from("u-1")).unwrap().is_approved());
        assert!(!dataset.merchants()[0].is_approved());
    }

    #[test]
    fn second_redemption_for_pair_is_rejected() {
        let mut dataset = Dataset::new();
        let mut tx = dataset.transaction();
        tx.put_redemption(redemption("r-1", "o-1", "s-1", 10)).unwrap();
        let err = tx
            .put_redemption(redemption("r-2", "o-1", "s-1", 11))
            .unwrap_err();
        assert!(err.to_string().contains("unique constraint"));
        let changes = tx.into_changes();
        dataset.apply(changes);

        let mut next = dataset.transaction();
        assert!(next.put_redemption(redemption("r-3", "o-1", "s-1", 12)).is_err());
        // Updating the existing redemption is fine.
        let mut consumed = redemption("r-1", "o-1", "s-1", 10);
        consumed.status = RedemptionStatus::Redeemed;
        next.put_redemption(consumed).unwrap();
        // Other pairs are unaffected.
        next.put_redemption(redemption("r-4", "o-1", "s-2", 13)).unwrap();
    }

    #[test]
    fn user_owns_at_most_one_profile_per_kind() {
        let mut dataset = Dataset::new();
        let mut tx = dataset.transaction();
        tx.put_student(student("s-1", "u-1")).unwrap();
        tx.put_merchant(merchant("m-1", "u-2")).unwrap();
        let err = tx.put_student(student("s-2", "u-1")).unwrap_err();
        assert!(err.to_string().contains("unique constraint"));
        assert!(tx.put_merchant(merchant("m-2", "u-2")).is_err());
        // The same user may hold one profile of each kind.
        tx.put_merchant(merchant("m-3", "u-1")).unwrap();
        let changes = tx.into_changes();
        dataset.apply(changes);

        let mut next = dataset.transaction();
        assert!(next.put_student(student("s-2", "u-1")).is_err());
        assert!(next.put_merchant(merchant("m-4", "u-1")).is_err());
        assert_eq!(
            next.student_by_user(&UserId::from("u-1")).unwrap().id,
            StudentId::from("s-1")
        );
        // Moving a profile to another user frees the old one.
        next.put_student(student("s-1", "u-7")).unwrap();
        assert!(next.student_by_user(&UserId::from("u-1")).is_none());
        next.put_student(student("s-2", "u-1")).unwrap();
        let changes = next.into_changes();
        dataset.apply(changes);

        let view = dataset.transaction();
        assert_eq!(
            view.student_by_user(&UserId::from("u-1")).unwrap().id,
            StudentId::from("s-2")
        );
        assert_eq!(
            view.student_by_user(&UserId::from("u-7")).unwrap().id,
            StudentId::from("s-1")
        );
    }

    #[test]
    fn user_index_is_rebuilt_on_load() {
        let mut dataset = Dataset::new();
        let mut tx = dataset.transaction();
        tx.put_merchant(merchant("m-1", "u-1")).unwrap();
        let changes = tx.into_changes();
        dataset.apply(changes);

        let restored: Dataset =
            serde_json::from_value(serde_json::to_value(&dataset).unwrap()).unwrap();
        let mut view = restored.transaction();
        assert_eq!(
            view.merchant_by_user(&UserId::from("u-1")).unwrap().id,
            MerchantId::from("m-1")
        );
        assert!(view.put_merchant(merchant("m-2", "u-1")).is_err());
    }

    #[test]
    fn serializes_as_entity_lists() {
        let mut dataset = Dataset::new();
        let mut tx = dataset.transaction();
        tx.put_redemption(redemption("r-2", "o-1", "s-2", 20)).unwrap();
        tx.put_redemption(redemption("r-1", "o-1", "s-1", 10)).unwrap();
        tx.put_student(student("s-1", "u-1")).unwrap();
        let changes = tx.into_changes();
        dataset.apply(changes);

        let json = serde_json::to_value(&dataset).unwrap();
        assert_eq!(json["redemptions"].as_array().unwrap().len(), 2);
        assert_eq!(json["redemptions"][0]["id"], "r-1");
        assert!(json["auditLog"].as_array().unwrap().is_empty());

        let restored: Dataset = serde_json::from_value(json).unwrap();
        let view = restored.transaction();
        assert!(
            view.redemption_for(&OfferId::from("o-1"), &StudentId::from("s-2"))
                .is_some()
        );
        assert_eq!(restored.redemptions().len(), 2);
    }

    #[test]
    fn missing_lists_deserialize_empty() {
        let dataset: Dataset = serde_json::from_str(r#"{"offers": []}"#).unwrap();
        assert!(dataset.redemptions().is_empty());
        assert!(dataset.audit_log().is_empty());
    }
}
