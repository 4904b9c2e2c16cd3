//! High-level marketplace facade with integrated storage.
//!
//! Combines a [`Storage`](crate::storage::Storage) /
//! [`BlockingStorage`](crate::storage::BlockingStorage) backend with the
//! ledger, the verification protocol and the dashboard projections.
//! Operations that act for a signed-in user take the caller's identity as
//! `Option<&Identity>`; `None` stands for an anonymous request.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::Result;
use crate::ledger::Issuance;

/// Source of the current time.
pub type Clock = fn() -> DateTime<Utc>;

/// Logs the outcome of an issuance request.
fn log_issuance(outcome: &Result<Issuance>) {
    match outcome.as_ref() {
        Ok(issuance) if issuance.newly_issued => info!(
            redemption = %issuance.redemption.id,
            offer = %issuance.redemption.offer_id,
            "redemption issued"
        ),
        Ok(issuance) => debug!(redemption = %issuance.redemption.id, "existing redemption returned"),
        Err(err) if err.kind().is_business_state() => {
            info!(kind = %err.kind(), error = %err, "issuance rejected");
        }
        Err(err) => debug!(error = %err, "issuance failed"),
    }
}

/// Generates a high-level marketplace facade (async or blocking).
macro_rules! define_marketplace {
    (
        facade_name: $facade:ident,
        builder_name: $builder:ident,
        storage_trait: $storage_trait:ident,
        facade_doc: $facade_doc:expr,
        builder_doc: $builder_doc:expr,
        $(async_kw: $async_kw:tt,)?
        $(await_kw: $await_ext:tt,)?
    ) => {
        #[doc = $builder_doc]
        #[derive(Debug)]
        pub struct $builder<S: $storage_trait> {
            /// Storage backend.
            storage: Option<S>,
            /// Coupon code prefix override.
            code_prefix: Option<String>,
            /// Clock override (for testing).
            clock: Option<Clock>,
            /// QR image decoder.
            qr_decoder: Option<Box<dyn QrDecoder>>,
        }

        impl<S: $storage_trait> $builder<S> {
            /// Sets the storage backend.
            #[inline]
            #[must_use]
            pub fn storage(mut self, storage: S) -> Self {
                self.storage = Some(storage);
                self
            }

            /// Sets the prefix of generated coupon codes (default `EDU`).
            #[inline]
            #[must_use]
            pub fn code_prefix<T: Into<String>>(mut self, prefix: T) -> Self {
                self.code_prefix = Some(prefix.into());
                self
            }

            /// Overrides the clock (default [`Utc::now`]).
            #[inline]
            #[must_use]
            pub const fn clock(mut self, clock: Clock) -> Self {
                self.clock = Some(clock);
                self
            }

            /// Sets the decoder used for camera frames and uploaded images
            /// (default [`NoQrDecoder`]).
            #[inline]
            #[must_use]
            pub fn qr_decoder(mut self, decoder: Box<dyn QrDecoder>) -> Self {
                self.qr_decoder = Some(decoder);
                self
            }

            /// Builds the facade.
            ///
            /// # Errors
            ///
            /// Returns [`EduPerksError::Storage`] if no storage was provided.
            /// Returns [`EduPerksError::InvalidInput`] if the code prefix is
            /// blank.
            #[inline]
            pub fn build(self) -> Result<$facade<S>> {
                let storage = self.storage.ok_or_else(|| {
                    EduPerksError::Storage("storage backend is required".into())
                })?;
                let code_prefix = self
                    .code_prefix
                    .unwrap_or_else(|| coupon::DEFAULT_PREFIX.to_owned());
                if code_prefix.trim().is_empty() {
                    return Err(EduPerksError::InvalidInput(
                        "coupon code prefix must not be blank".to_owned(),
                    ));
                }
                Ok($facade {
                    storage,
                    code_prefix,
                    clock: self.clock.unwrap_or(Utc::now),
                    qr_decoder: self.qr_decoder.unwrap_or_else(|| Box::new(NoQrDecoder)),
                })
            }
        }

        #[doc = $facade_doc]
        #[derive(Debug)]
        pub struct $facade<S: $storage_trait> {
            /// Storage backend.
            storage: S,
            /// Prefix of generated coupon codes.
            code_prefix: String,
            /// Source of the current time.
            clock: Clock,
            /// QR image decoder.
            qr_decoder: Box<dyn QrDecoder>,
        }

        impl<S: $storage_trait> $facade<S> {
            /// Creates a new builder for configuring the facade.
            #[inline]
            #[must_use]
            pub const fn builder() -> $builder<S> {
                $builder {
                    storage: None,
                    code_prefix: None,
                    clock: None,
                    qr_decoder: None,
                }
            }

            /// Returns the storage backend.
            #[inline]
            #[must_use]
            pub const fn storage(&self) -> &S {
                &self.storage
            }

            /// Current time according to the configured clock.
            fn now(&self) -> DateTime<Utc> {
                (self.clock)()
            }

            // ── Issuance ────────────────────────────────────────────

            /// Issues (or returns the existing) redemption of an offer for a
            /// student.
            ///
            /// # Errors
            ///
            /// Returns the errors of [`ledger::issue_redemption`], or a
            /// storage error.
            #[tracing::instrument(skip_all, fields(offer = %offer_id, student = %student_id))]
            pub $($async_kw)? fn issue_redemption(
                &self,
                offer_id: &OfferId,
                student_id: &StudentId,
            ) -> Result<Issuance> {
                let now = self.now();
                let prefix = self.code_prefix.as_str();
                let outcome = self
                    .storage
                    .transaction(|tx| {
                        ledger::issue_redemption(tx, &mut rand::rng(), prefix, offer_id, student_id, now)
                    })
                    $( .$await_ext )?;
                log_issuance(&outcome);
                outcome
            }

            /// Issues a redemption for the signed-in student.
            ///
            /// # Errors
            ///
            /// Returns [`EduPerksError::Forbidden`] unless the caller is a
            /// student with a verified profile, then the errors of
            /// [`ledger::issue_redemption`].
            #[tracing::instrument(skip_all, fields(offer = %offer_id))]
            pub $($async_kw)? fn issue_for(
                &self,
                identity: Option<&Identity>,
                offer_id: &OfferId,
            ) -> Result<Issuance> {
                let caller = require_role(identity, Role::Student)?;
                let now = self.now();
                let prefix = self.code_prefix.as_str();
                let outcome = self
                    .storage
                    .transaction(|tx| {
                        let student = tx.student_by_user(&caller.user_id).ok_or_else(|| {
                            EduPerksError::Forbidden("no student profile for caller".to_owned())
                        })?;
                        if !student.is_verified() {
                            return Err(EduPerksError::Forbidden(
                                "student email is not verified".to_owned(),
                            ));
                        }
                        let student_id = student.id.clone();
                        ledger::issue_redemption(tx, &mut rand::rng(), prefix, offer_id, &student_id, now)
                    })
                    $( .$await_ext )?;
                log_issuance(&outcome);
                outcome
            }

            // ── Verification ────────────────────────────────────────

            /// Consumes the redemption named by `token` for `merchant_id`.
            ///
            /// # Errors
            ///
            /// Returns the errors of [`ledger::consume_redemption`], or a
            /// storage error.
            #[tracing::instrument(skip_all, fields(merchant = %merchant_id))]
            pub $($async_kw)? fn consume_redemption(
                &self,
                token: &str,
                merchant_id: &MerchantId,
            ) -> Result<RedemptionSnapshot> {
                let now = self.now();
                let outcome = self
                    .storage
                    .transaction(|tx| ledger::consume_redemption(tx, token, merchant_id, now))
                    $( .$await_ext )?;
                verification::log_outcome(merchant_id, &outcome);
                outcome
            }

            /// Verifies a scanned, uploaded or pasted token for the
            /// signed-in merchant.
            ///
            /// The caller is authorized before the input is looked at.
            ///
            /// # Errors
            ///
            /// Returns [`EduPerksError::Forbidden`] unless the caller is a
            /// merchant with an approved profile,
            /// [`EduPerksError::MalformedToken`] if no token can be
            /// extracted from the input, then the errors of
            /// [`ledger::consume_redemption`].
            #[tracing::instrument(skip_all, fields(source = input.source()))]
            pub $($async_kw)? fn verify(
                &self,
                identity: Option<&Identity>,
                input: ScanInput,
            ) -> Result<RedemptionSnapshot> {
                let merchant = self
                    .storage
                    .transaction(|tx| verification::authorize_merchant(tx, identity))
                    $( .$await_ext )?
                    ?;
                let now = self.now();
                let merchant_id = &merchant.id;
                let outcome = match input.into_token(&*self.qr_decoder) {
                    Ok(token) => self
                        .storage
                        .transaction(|tx| ledger::consume_redemption(tx, &token, merchant_id, now))
                        $( .$await_ext )?,
                    Err(err) => Err(err),
                };
                verification::log_outcome(merchant_id, &outcome);
                outcome
            }

            // ── Merchant and admin actions ──────────────────────────

            /// Publishes an offer for the signed-in merchant.
            ///
            /// # Errors
            ///
            /// Returns [`EduPerksError::Forbidden`] unless the caller is a
            /// merchant with an approved profile, and
            /// [`EduPerksError::InvalidInput`] if `input` is invalid.
            #[tracing::instrument(skip_all)]
            pub $($async_kw)? fn create_offer(
                &self,
                identity: Option<&Identity>,
                input: NewOffer,
            ) -> Result<Offer> {
                let caller = require_role(identity, Role::Merchant)?;
                let now = self.now();
                let offer = self
                    .storage
                    .transaction(move |tx| {
                        let merchant_id = tx
                            .merchant_by_user(&caller.user_id)
                            .map(|merchant| merchant.id.clone())
                            .ok_or_else(|| {
                                EduPerksError::Forbidden("no merchant profile for caller".to_owned())
                            })?;
                        ledger::create_offer(tx, &merchant_id, input, now)
                    })
                    $( .$await_ext )?
                    ?;
                info!(offer = %offer.id, merchant = %offer.merchant_id, "offer created");
                Ok(offer)
            }

            /// Approves a merchant's KYC.
            ///
            /// # Errors
            ///
            /// Returns [`EduPerksError::Forbidden`] unless the caller is an
            /// admin, and [`EduPerksError::NotFound`] for an unknown
            /// merchant.
            #[tracing::instrument(skip_all, fields(merchant = %merchant_id))]
            pub $($async_kw)? fn approve_merchant(
                &self,
                identity: Option<&Identity>,
                merchant_id: &MerchantId,
            ) -> Result<Merchant> {
                let caller = require_role(identity, Role::Admin)?;
                let now = self.now();
                let merchant = self
                    .storage
                    .transaction(|tx| ledger::approve_merchant(tx, &caller.user_id, merchant_id, now))
                    $( .$await_ext )?
                    ?;
                info!("merchant approved");
                Ok(merchant)
            }

            /// Changes an offer's status.
            ///
            /// # Errors
            ///
            /// Returns [`EduPerksError::Forbidden`] unless the caller is an
            /// admin, and [`EduPerksError::NotFound`] for an unknown offer.
            #[tracing::instrument(skip_all, fields(offer = %offer_id, status = %status))]
            pub $($async_kw)? fn set_offer_status(
                &self,
                identity: Option<&Identity>,
                offer_id: &OfferId,
                status: OfferStatus,
            ) -> Result<Offer> {
                let caller = require_role(identity, Role::Admin)?;
                let now = self.now();
                let offer = self
                    .storage
                    .transaction(|tx| {
                        ledger::set_offer_status(tx, &caller.user_id, offer_id, status, now)
                    })
                    $( .$await_ext )?
                    ?;
                info!("offer status changed");
                Ok(offer)
            }

            /// Marks a student's email as verified. Called by the email
            /// verification flow.
            ///
            /// # Errors
            ///
            /// Returns [`EduPerksError::NotFound`] for an unknown student.
            #[tracing::instrument(skip_all, fields(student = %student_id))]
            pub $($async_kw)? fn verify_student(&self, student_id: &StudentId) -> Result<Student> {
                let now = self.now();
                self.storage
                    .transaction(|tx| {
                        let actor = tx.student(student_id).map(|student| student.user_id.clone());
                        ledger::verify_student(tx, actor, student_id, now)
                    })
                    $( .$await_ext )?
            }

            // ── Registration hooks ──────────────────────────────────

            /// Inserts or updates an offer record and returns what was
            /// stored. Issuance and usage counters of an existing offer are
            /// kept.
            ///
            /// # Errors
            ///
            /// Returns [`EduPerksError::InvalidInput`] if the cap drops below
            /// the redemptions already issued, or a storage error.
            #[inline]
            pub $($async_kw)? fn register_offer(&self, offer: Offer) -> Result<Offer> {
                self.storage
                    .transaction(move |tx| ledger::register_offer(tx, offer))
                    $( .$await_ext )?
            }

            /// Inserts or updates a student record and returns what was
            /// stored. A verified student stays verified.
            ///
            /// # Errors
            ///
            /// Returns [`EduPerksError::Storage`] if the user already owns
            /// another student profile, or if the backend fails.
            #[inline]
            pub $($async_kw)? fn register_student(&self, student: Student) -> Result<Student> {
                self.storage
                    .transaction(move |tx| ledger::register_student(tx, student))
                    $( .$await_ext )?
            }

            /// Inserts or updates a merchant record and returns what was
            /// stored. The KYC status of an existing merchant is kept.
            ///
            /// # Errors
            ///
            /// Returns [`EduPerksError::Storage`] if the user already owns
            /// another merchant profile, or if the backend fails.
            #[inline]
            pub $($async_kw)? fn register_merchant(&self, merchant: Merchant) -> Result<Merchant> {
                self.storage
                    .transaction(move |tx| ledger::register_merchant(tx, merchant))
                    $( .$await_ext )?
            }

            // ── Projections ─────────────────────────────────────────

            /// Returns offers students can redeem right now, newest first.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            #[inline]
            pub $($async_kw)? fn active_offers(&self) -> Result<Vec<Offer>> {
                let offers = self.storage.offers() $( .$await_ext )? ?;
                Ok(projection::active_offers(offers, self.now()))
            }

            /// Returns live offers with their merchants' trade names,
            /// newest first.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            #[inline]
            pub $($async_kw)? fn offer_listings(&self) -> Result<Vec<OfferListing>> {
                let offers = self.storage.offers() $( .$await_ext )? ?;
                let merchants = self.storage.merchants() $( .$await_ext )? ?;
                Ok(projection::offer_listings(offers, &merchants, self.now()))
            }

            /// Returns draft offers and merchants awaiting KYC review.
            ///
            /// # Errors
            ///
            /// Returns [`EduPerksError::Forbidden`] unless the caller is an
            /// admin, or a storage error.
            #[inline]
            pub $($async_kw)? fn review_queue(&self, identity: Option<&Identity>) -> Result<ReviewQueue> {
                let _caller = require_role(identity, Role::Admin)?;
                let offers = self.storage.offers() $( .$await_ext )? ?;
                let merchants = self.storage.merchants() $( .$await_ext )? ?;
                Ok(projection::review_queue(offers, merchants))
            }

            /// Returns issuance and usage counters of an offer.
            ///
            /// # Errors
            ///
            /// Returns [`EduPerksError::NotFound`] for an unknown offer, or a
            /// storage error.
            #[inline]
            pub $($async_kw)? fn offer_stats(&self, offer_id: &OfferId) -> Result<OfferStats> {
                let offers = self.storage.offers() $( .$await_ext )? ?;
                offers
                    .iter()
                    .find(|offer| offer.id == *offer_id)
                    .map(OfferStats::of)
                    .ok_or_else(|| EduPerksError::not_found(EntityKind::Offer, offer_id))
            }

            /// Returns redemptions of a merchant's offers, newest first.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            #[inline]
            pub $($async_kw)? fn redemptions_for_merchant(
                &self,
                merchant_id: &MerchantId,
            ) -> Result<Vec<MerchantRedemption>> {
                let offers = self.storage.offers() $( .$await_ext )? ?;
                let redemptions = self.storage.redemptions() $( .$await_ext )? ?;
                Ok(projection::merchant_redemptions(merchant_id, &offers, redemptions))
            }

            /// Returns a student's redemptions, newest first.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            #[inline]
            pub $($async_kw)? fn redemptions_for_student(
                &self,
                student_id: &StudentId,
            ) -> Result<Vec<Redemption>> {
                let redemptions = self.storage.redemptions() $( .$await_ext )? ?;
                Ok(projection::student_redemptions(student_id, redemptions))
            }

            /// Returns the whole audit trail, in append order.
            ///
            /// # Errors
            ///
            /// Returns [`EduPerksError::Forbidden`] unless the caller is an
            /// admin, or a storage error.
            #[inline]
            pub $($async_kw)? fn audit_log(
                &self,
                identity: Option<&Identity>,
            ) -> Result<Vec<AuditLogEntry>> {
                let _caller = require_role(identity, Role::Admin)?;
                self.storage.audit_log() $( .$await_ext )?
            }

            /// Returns audit entries about one entity, in append order.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            #[inline]
            pub $($async_kw)? fn audit_trail(&self, entity_id: &str) -> Result<Vec<AuditLogEntry>> {
                let entries = self.storage.audit_log() $( .$await_ext )? ?;
                Ok(projection::audit_trail(entries, entity_id))
            }
        }
    };
}

#[cfg(feature = "async")]
mod async_marketplace {
    //! Async marketplace facade.

    use chrono::{DateTime, Utc};
    use tracing::info;

    use super::{Clock, log_issuance};
    use crate::coupon;
    use crate::error::{EduPerksError, Result};
    use crate::ledger::{self, Issuance};
    use crate::models::{
        AuditLogEntry, EntityKind, Identity, Merchant, MerchantId, NewOffer, Offer, OfferId,
        OfferStatus, Redemption, RedemptionSnapshot, Role, Student, StudentId, require_role,
    };
    use crate::projection::{self, MerchantRedemption, OfferListing, OfferStats, ReviewQueue};
    use crate::storage::Storage;
    use crate::verification::{self, NoQrDecoder, QrDecoder, ScanInput};

    define_marketplace! {
        facade_name: Marketplace,
        builder_name: MarketplaceBuilder,
        storage_trait: Storage,
        facade_doc: "High-level async marketplace facade with integrated storage.\n\nUse [`Marketplace::builder()`] to construct an instance.",
        builder_doc: "Builder for constructing a [`Marketplace`].",
        async_kw: async,
        await_kw: await,
    }
}

#[cfg(feature = "blocking")]
mod blocking_marketplace {
    //! Blocking marketplace facade.

    use chrono::{DateTime, Utc};
    use tracing::info;

    use super::{Clock, log_issuance};
    use crate::coupon;
    use crate::error::{EduPerksError, Result};
    use crate::ledger::{self, Issuance};
    use crate::models::{
        AuditLogEntry, EntityKind, Identity, Merchant, MerchantId, NewOffer, Offer, OfferId,
        OfferStatus, Redemption, RedemptionSnapshot, Role, Student, StudentId, require_role,
    };
    use crate::projection::{self, MerchantRedemption, OfferListing, OfferStats, ReviewQueue};
    use crate::storage::BlockingStorage;
    use crate::verification::{self, NoQrDecoder, QrDecoder, ScanInput};

    define_marketplace! {
        facade_name: MarketplaceBlocking,
        builder_name: MarketplaceBlockingBuilder,
        storage_trait: BlockingStorage,
        facade_doc: "High-level blocking marketplace facade with integrated storage.\n\nUse [`MarketplaceBlocking::builder()`] to construct an instance.",
        builder_doc: "Builder for constructing a [`MarketplaceBlocking`].",
    }
}

#[cfg(feature = "async")]
pub use async_marketplace::{Marketplace, MarketplaceBuilder};
#[cfg(feature = "blocking")]
pub use blocking_marketplace::{MarketplaceBlocking, MarketplaceBlockingBuilder};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{
        Identity, KycStatus, Merchant, MerchantId, NewOffer, Offer, OfferId, OfferStatus,
        RedemptionMethod, RedemptionSnapshot, Role, Student, StudentId, UserId,
        VerificationStatus, action,
    };
    use crate::storage::InMemoryStorage;
    use crate::verification::{QrDecoder, ScanInput};
    use chrono::Duration;

    const NOW_SECS: i64 = 1_700_000_000;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::from_timestamp(NOW_SECS, 0).unwrap()
    }

    /// Decoder that treats the image bytes as UTF-8 text.
    #[derive(Debug)]
    struct Utf8Decoder;

    impl QrDecoder for Utf8Decoder {
        fn decode(&self, image: &[u8]) -> Option<String> {
            String::from_utf8(image.to_vec()).ok()
        }
    }

    fn user(id: &str, role: Role) -> Identity {
        Identity::new(UserId::from(format!("u-{id}").as_str()), role)
    }

    fn merchant(id: &str, kyc_status: KycStatus) -> Merchant {
        Merchant {
            id: MerchantId::from(id),
            user_id: UserId::from(format!("u-{id}").as_str()),
            legal_name: format!("{id} Ltd"),
            trade_name: id.to_owned(),
            kyc_status,
        }
    }

    fn student(id: &str, verification_status: VerificationStatus) -> Student {
        Student {
            id: StudentId::from(id),
            user_id: UserId::from(format!("u-{id}").as_str()),
            name: Some(format!("Student {id}")),
            email: format!("{id}@uni.example"),
            verification_status,
        }
    }

    fn offer(id: &str, merchant_id: &str, cap: u32) -> Offer {
        Offer {
            id: OfferId::from(id),
            merchant_id: MerchantId::from(merchant_id),
            title: format!("Offer {id}"),
            description: "Student discount".to_owned(),
            category: "food".to_owned(),
            discount_percent: 20,
            redirect_url: "https://shop.example".to_owned(),
            status: OfferStatus::Active,
            start_at: fixed_now(),
            end_at: fixed_now() + Duration::days(30),
            redemption_type: RedemptionMethod::Qr,
            student_cap: cap,
            redemption_count: 0,
            used_count: 0,
            code_template: None,
            created_at: fixed_now(),
        }
    }

    fn new_offer() -> NewOffer {
        NewOffer {
            title: "Weekend deal".to_owned(),
            description: "15% off".to_owned(),
            category: "food".to_owned(),
            discount_percent: 15,
            redirect_url: "https://shop.example/weekend".to_owned(),
            redemption_type: RedemptionMethod::Qr,
            student_cap: 0,
            code_template: None,
            valid_for_days: Some(7),
        }
    }

    #[cfg(feature = "blocking")]
    mod blocking {
        use super::*;
        use crate::storage::BlockingStorage;

        fn market() -> MarketplaceBlocking<InMemoryStorage> {
            let market = MarketplaceBlocking::builder()
                .storage(InMemoryStorage::new())
                .clock(fixed_now)
                .qr_decoder(Box::new(Utf8Decoder))
                .build()
                .unwrap();
            drop(market.register_merchant(merchant("M1", KycStatus::Approved)).unwrap());
            drop(market.register_merchant(merchant("M2", KycStatus::Approved)).unwrap());
            drop(market.register_merchant(merchant("M3", KycStatus::Pending)).unwrap());
            for id in ["S1", "S2", "S3"] {
                drop(market.register_student(student(id, VerificationStatus::Verified)).unwrap());
            }
            drop(market.register_student(student("S4", VerificationStatus::Pending)).unwrap());
            drop(market.register_offer(offer("O1", "M1", 2)).unwrap());
            market
        }

        fn issue(
            market: &MarketplaceBlocking<InMemoryStorage>,
            offer_id: &str,
            student_id: &str,
        ) -> Result<Issuance> {
            market.issue_redemption(&OfferId::from(offer_id), &StudentId::from(student_id))
        }

        #[test]
        fn build_requires_storage() {
            let err = MarketplaceBlocking::<InMemoryStorage>::builder().build().unwrap_err();
            assert!(err.to_string().contains("storage backend is required"));
        }

        #[test]
        fn build_rejects_blank_prefix() {
            let err = MarketplaceBlocking::builder()
                .storage(InMemoryStorage::new())
                .code_prefix("  ")
                .build()
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }

        #[test]
        fn custom_prefix_is_used() {
            let market = MarketplaceBlocking::builder()
                .storage(InMemoryStorage::new())
                .code_prefix("UNI")
                .clock(fixed_now)
                .build()
                .unwrap();
            drop(market.register_student(student("S1", VerificationStatus::Verified)).unwrap());
            drop(market.register_offer(offer("O1", "M1", 0)).unwrap());
            let issuance = market
                .issue_redemption(&OfferId::from("O1"), &StudentId::from("S1"))
                .unwrap();
            assert!(issuance.redemption.coupon_code.starts_with("UNI-"));
        }

        #[test]
        fn capacity_scenario() {
            let market = market();
            let first = issue(&market, "O1", "S1").unwrap();
            assert!(first.redemption.coupon_code.starts_with("EDU-"));
            assert_eq!(market.offer_stats(&OfferId::from("O1")).unwrap().issued, 1);

            let again = issue(&market, "O1", "S1").unwrap();
            assert_eq!(again.redemption.id, first.redemption.id);
            assert_eq!(again.redemption.coupon_code, first.redemption.coupon_code);
            assert_eq!(market.offer_stats(&OfferId::from("O1")).unwrap().issued, 1);

            let _second = issue(&market, "O1", "S2").unwrap();
            assert_eq!(market.offer_stats(&OfferId::from("O1")).unwrap().issued, 2);

            let err = issue(&market, "O1", "S3").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
            let stats = market.offer_stats(&OfferId::from("O1")).unwrap();
            assert_eq!(stats.issued, 2);
            assert_eq!(stats.remaining(), Some(0));
        }

        #[test]
        fn single_use_scenario() {
            let market = market();
            let token = issue(&market, "O1", "S1").unwrap().token.unwrap();
            let merchant_user = user("M1", Role::Merchant);

            let snapshot = market
                .verify(Some(&merchant_user), ScanInput::Manual(token.clone()))
                .unwrap();
            assert_eq!(snapshot.redeemed_at, Some(fixed_now()));
            assert_eq!(snapshot.display_name(), "Student S1");

            let retry = market
                .verify(Some(&merchant_user), ScanInput::CameraFrame(token.into_bytes()))
                .unwrap_err();
            assert_eq!(retry.kind(), ErrorKind::AlreadyConsumed);
            assert_eq!(retry.prior_use().unwrap().redeemed_at, Some(fixed_now()));

            let stats = market.offer_stats(&OfferId::from("O1")).unwrap();
            assert_eq!(stats.used, 1);
            assert_eq!(stats.issued, 1);
        }

        #[test]
        fn tampered_digest_never_succeeds() {
            let market = market();
            let token = issue(&market, "O1", "S1").unwrap().token.unwrap();
            let (body, digest) = token.split_once('.').unwrap();
            for (index, ch) in digest.char_indices() {
                let replacement = if ch == 'a' { 'b' } else { 'a' };
                let flipped: String = digest
                    .char_indices()
                    .map(|(pos, orig)| if pos == index { replacement } else { orig })
                    .collect();
                let err = market
                    .consume_redemption(&format!("{body}.{flipped}"), &MerchantId::from("M1"))
                    .unwrap_err();
                assert_eq!(err.kind(), ErrorKind::TamperedToken);
            }
            assert_eq!(market.offer_stats(&OfferId::from("O1")).unwrap().used, 0);
        }

        #[test]
        fn authorization_precedes_decoding() {
            let market = market();
            let garbage = ScanInput::Manual("not a token".to_owned());
            for caller in [
                None,
                Some(user("S1", Role::Student)),
                Some(user("M3", Role::Merchant)),
                Some(user("nobody", Role::Merchant)),
            ] {
                let err = market.verify(caller.as_ref(), garbage.clone()).unwrap_err();
                assert_eq!(err.kind(), ErrorKind::Forbidden);
            }
            let err = market
                .verify(Some(&user("M1", Role::Merchant)), garbage)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedToken);
        }

        #[test]
        fn non_owner_is_forbidden() {
            let market = market();
            let token = issue(&market, "O1", "S1").unwrap().token.unwrap();
            let err = market
                .verify(Some(&user("M2", Role::Merchant)), ScanInput::Manual(token))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Forbidden);
            assert_eq!(market.offer_stats(&OfferId::from("O1")).unwrap().used, 0);
        }

        #[test]
        fn expired_offer_is_rejected() {
            let market = market();
            let mut ended = offer("O2", "M1", 0);
            ended.end_at = fixed_now() - Duration::seconds(1);
            drop(market.register_offer(ended).unwrap());
            let token = issue(&market, "O2", "S1").unwrap().token.unwrap();
            let err = market
                .consume_redemption(&token, &MerchantId::from("M1"))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Expired);
        }

        #[test]
        fn issue_for_requires_verified_student() {
            let market = market();
            let offer_id = OfferId::from("O1");
            let issued = market
                .issue_for(Some(&user("S1", Role::Student)), &offer_id)
                .unwrap();
            assert_eq!(issued.redemption.student_id, StudentId::from("S1"));

            for caller in [
                None,
                Some(user("S4", Role::Student)),
                Some(user("M1", Role::Merchant)),
                Some(user("ghost", Role::Student)),
            ] {
                let err = market.issue_for(caller.as_ref(), &offer_id).unwrap_err();
                assert_eq!(err.kind(), ErrorKind::Forbidden);
            }

            let verified = market.verify_student(&StudentId::from("S4")).unwrap();
            assert!(verified.is_verified());
            assert!(
                market
                    .issue_for(Some(&user("S4", Role::Student)), &offer_id)
                    .is_ok()
            );
        }

        #[test]
        fn merchant_and_admin_flows() {
            let market = market();
            let pending = user("M3", Role::Merchant);
            let admin = user("root", Role::Admin);

            let err = market.create_offer(Some(&pending), new_offer()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Forbidden);

            let err = market
                .approve_merchant(Some(&pending), &MerchantId::from("M3"))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Forbidden);

            let approved = market
                .approve_merchant(Some(&admin), &MerchantId::from("M3"))
                .unwrap();
            assert!(approved.is_approved());

            let created = market.create_offer(Some(&pending), new_offer()).unwrap();
            assert_eq!(created.merchant_id, MerchantId::from("M3"));
            assert_eq!(created.end_at, fixed_now() + Duration::days(7));

            let mut invalid = new_offer();
            invalid.title = " ".to_owned();
            let err = market.create_offer(Some(&pending), invalid).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);

            let expired = market
                .set_offer_status(Some(&admin), &created.id, OfferStatus::Expired)
                .unwrap();
            assert_eq!(expired.status, OfferStatus::Expired);
            let err = issue(&market, created.id.as_inner(), "S1").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotActive);

            let trail = market.audit_trail(created.id.as_inner()).unwrap();
            let actions: Vec<&str> = trail.iter().map(|entry| entry.action.as_str()).collect();
            assert_eq!(actions, [action::OFFER_CREATE, action::OFFER_STATUS]);
        }

        #[test]
        fn projections() {
            let market = market();
            drop(market.register_offer(offer("O2", "M2", 0)).unwrap());
            let mut draft = offer("O3", "M1", 0);
            draft.status = OfferStatus::Draft;
            drop(market.register_offer(draft).unwrap());

            let live: Vec<OfferId> = market
                .active_offers()
                .unwrap()
                .into_iter()
                .map(|item| item.id)
                .collect();
            assert_eq!(live.len(), 2);
            assert!(!live.contains(&OfferId::from("O3")));

            let _first = issue(&market, "O1", "S1").unwrap();
            let _second = issue(&market, "O2", "S1").unwrap();
            let _third = issue(&market, "O1", "S2").unwrap();

            let rows = market
                .redemptions_for_merchant(&MerchantId::from("M1"))
                .unwrap();
            assert_eq!(rows.len(), 2);
            assert!(rows.iter().all(|row| row.offer_title == "Offer O1"));

            let held = market
                .redemptions_for_student(&StudentId::from("S1"))
                .unwrap();
            assert_eq!(held.len(), 2);

            let err = market.offer_stats(&OfferId::from("nope")).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }

        #[test]
        fn reregistration_cannot_reopen_a_full_offer() {
            let market = market();
            let _first = issue(&market, "O1", "S1").unwrap();
            let _second = issue(&market, "O1", "S2").unwrap();

            let stored = market.register_offer(offer("O1", "M1", 2)).unwrap();
            assert_eq!(stored.redemption_count, 2);
            let err = issue(&market, "O1", "S3").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::CapacityExceeded);

            let err = market.register_offer(offer("O1", "M1", 1)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
            let stats = market.offer_stats(&OfferId::from("O1")).unwrap();
            assert_eq!((stats.issued, stats.student_cap), (2, 2));
        }

        #[test]
        fn reregistration_keeps_review_status() {
            let market = market();
            let student_profile = market
                .register_student(student("S1", VerificationStatus::Pending))
                .unwrap();
            assert!(student_profile.is_verified());
            assert!(
                market
                    .issue_for(Some(&user("S1", Role::Student)), &OfferId::from("O1"))
                    .is_ok()
            );

            let merchant_profile = market
                .register_merchant(merchant("M1", KycStatus::Pending))
                .unwrap();
            assert!(merchant_profile.is_approved());
            assert!(
                market
                    .create_offer(Some(&user("M1", Role::Merchant)), new_offer())
                    .is_ok()
            );
        }

        #[test]
        fn user_cannot_own_two_profiles_of_a_kind() {
            let market = market();
            let mut second = student("S9", VerificationStatus::Verified);
            second.user_id = UserId::from("u-S1");
            let err = market.register_student(second).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Internal);

            let mut shop = merchant("M9", KycStatus::Approved);
            shop.user_id = UserId::from("u-M1");
            assert!(market.register_merchant(shop).is_err());

            let issued = market
                .issue_for(Some(&user("S1", Role::Student)), &OfferId::from("O1"))
                .unwrap();
            assert_eq!(issued.redemption.student_id, StudentId::from("S1"));
        }

        #[test]
        fn listings_and_review_queue() {
            let market = market();
            let mut draft = offer("O3", "M2", 0);
            draft.status = OfferStatus::Draft;
            drop(market.register_offer(draft).unwrap());

            let listings = market.offer_listings().unwrap();
            let names: Vec<(&str, &str)> = listings
                .iter()
                .map(|listing| (listing.offer.id.as_inner(), listing.merchant_name.as_str()))
                .collect();
            assert_eq!(names, [("O1", "M1")]);

            let err = market
                .review_queue(Some(&user("M1", Role::Merchant)))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Forbidden);
            let queue = market.review_queue(Some(&user("root", Role::Admin))).unwrap();
            assert_eq!(queue.draft_offers.len(), 1);
            assert_eq!(queue.pending_merchants.len(), 1);
            assert_eq!(queue.pending_merchants.first().unwrap().id, MerchantId::from("M3"));
        }

        #[test]
        fn audit_log_is_admin_only() {
            let market = market();
            let _issued = issue(&market, "O1", "S1").unwrap();
            let err = market
                .audit_log(Some(&user("M1", Role::Merchant)))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Forbidden);
            let log = market.audit_log(Some(&user("root", Role::Admin))).unwrap();
            let actions: Vec<&str> = log.iter().map(|entry| entry.action.as_str()).collect();
            assert_eq!(actions, [action::REDEMPTION_CREATE]);
        }

        #[test]
        fn concurrent_issuance_respects_cap_and_uniqueness() {
            let market = MarketplaceBlocking::builder()
                .storage(InMemoryStorage::new())
                .clock(fixed_now)
                .build()
                .unwrap();
            drop(market.register_offer(offer("O1", "M1", 5)).unwrap());
            let students: Vec<String> = (0..20).map(|n| format!("S{n:02}")).collect();
            for id in &students {
                drop(market.register_student(student(id, VerificationStatus::Verified)).unwrap());
            }

            let results: Vec<Result<Issuance>> =
                std::thread::scope(|scope| {
                    let handles: Vec<_> = students
                        .iter()
                        .flat_map(|id| [id, id])
                        .map(|id| {
                            let market_ref = &market;
                            scope.spawn(move || {
                                market_ref
                                    .issue_redemption(&OfferId::from("O1"), &StudentId::from(id.as_str()))
                            })
                        })
                        .collect();
                    handles.into_iter().map(|handle| handle.join().unwrap()).collect()
                });

            let issued = results.iter().filter(|result| result.is_ok()).count();
            let rejected = results
                .iter()
                .filter(|result| {
                    result
                        .as_ref()
                        .is_err_and(|err| err.kind() == ErrorKind::CapacityExceeded)
                })
                .count();
            assert_eq!(issued + rejected, results.len());
            assert_eq!(market.storage().redemptions().unwrap().len(), 5);
            assert_eq!(market.offer_stats(&OfferId::from("O1")).unwrap().issued, 5);

            let mut holders: Vec<StudentId> = market
                .storage()
                .redemptions()
                .unwrap()
                .into_iter()
                .map(|redemption| redemption.student_id)
                .collect();
            holders.sort();
            holders.dedup();
            assert_eq!(holders.len(), 5);
        }

        #[test]
        fn concurrent_consumption_counts_once() {
            let market = market();
            let token = issue(&market, "O1", "S1").unwrap().token.unwrap();
            let merchant_id = MerchantId::from("M1");

            let results: Vec<Result<RedemptionSnapshot>> =
                std::thread::scope(|scope| {
                    let handles: Vec<_> = (0..8)
                        .map(|_| scope.spawn(|| market.consume_redemption(&token, &merchant_id)))
                        .collect();
                    handles.into_iter().map(|handle| handle.join().unwrap()).collect()
                });

            assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
            assert!(results.iter().all(|result| {
                result
                    .as_ref()
                    .map_or_else(|err| err.kind() == ErrorKind::AlreadyConsumed, |_| true)
            }));
            assert_eq!(market.offer_stats(&OfferId::from("O1")).unwrap().used, 1);
            let verified = market
                .audit_log(Some(&user("root", Role::Admin)))
                .unwrap()
                .into_iter()
                .filter(|entry| entry.action == action::QR_VERIFIED)
                .count();
            assert_eq!(verified, 1);
        }

        #[cfg(feature = "storage-file")]
        #[test]
        fn file_backed_scenario_survives_reopen() {
            use crate::storage::FileStorage;

            let dir = tempfile::tempdir().unwrap();
            let open = || {
                MarketplaceBlocking::builder()
                    .storage(FileStorage::new(dir.path().to_path_buf()).unwrap())
                    .clock(fixed_now)
                    .build()
                    .unwrap()
            };

            let token = {
                let market = open();
                drop(market.register_merchant(merchant("M1", KycStatus::Approved)).unwrap());
                drop(market.register_student(student("S1", VerificationStatus::Verified)).unwrap());
                drop(market.register_offer(offer("O1", "M1", 1)).unwrap());
                market
                    .issue_redemption(&OfferId::from("O1"), &StudentId::from("S1"))
                    .unwrap()
                    .token
                    .unwrap()
            };

            let reopened = open();
            let snapshot = reopened
                .verify(Some(&user("M1", Role::Merchant)), ScanInput::Manual(token.clone()))
                .unwrap();
            assert_eq!(snapshot.offer_title, "Offer O1");
            let retry = reopened
                .consume_redemption(&token, &MerchantId::from("M1"))
                .unwrap_err();
            assert_eq!(retry.kind(), ErrorKind::AlreadyConsumed);
            let stats = reopened.offer_stats(&OfferId::from("O1")).unwrap();
            assert_eq!((stats.issued, stats.used), (1, 1));
        }
    }

    #[cfg(feature = "async")]
    mod async_tests {
        use super::*;

        async fn market() -> Marketplace<InMemoryStorage> {
            let market = Marketplace::builder()
                .storage(InMemoryStorage::new())
                .clock(fixed_now)
                .build()
                .unwrap();
            drop(market.register_merchant(merchant("M1", KycStatus::Approved)).await.unwrap());
            drop(market.register_merchant(merchant("M2", KycStatus::Approved)).await.unwrap());
            drop(market.register_student(student("S1", VerificationStatus::Verified)).await.unwrap());
            drop(market.register_student(student("S2", VerificationStatus::Verified)).await.unwrap());
            drop(market.register_offer(offer("O1", "M1", 1)).await.unwrap());
            market
        }

        #[tokio::test]
        async fn issue_and_verify() {
            let market = market().await;
            let issuance = market
                .issue_for(Some(&user("S1", Role::Student)), &OfferId::from("O1"))
                .await
                .unwrap();
            let token = issuance.token.unwrap();

            let full = market
                .issue_redemption(&OfferId::from("O1"), &StudentId::from("S2"))
                .await
                .unwrap_err();
            assert_eq!(full.kind(), ErrorKind::CapacityExceeded);

            let forbidden = market
                .verify(Some(&user("M2", Role::Merchant)), ScanInput::Manual(token.clone()))
                .await
                .unwrap_err();
            assert_eq!(forbidden.kind(), ErrorKind::Forbidden);

            let snapshot = market
                .verify(Some(&user("M1", Role::Merchant)), ScanInput::Manual(token.clone()))
                .await
                .unwrap();
            assert_eq!(snapshot.verified_by, Some(MerchantId::from("M1")));

            let retry = market
                .consume_redemption(&token, &MerchantId::from("M1"))
                .await
                .unwrap_err();
            assert_eq!(retry.kind(), ErrorKind::AlreadyConsumed);

            let stats = market.offer_stats(&OfferId::from("O1")).await.unwrap();
            assert_eq!((stats.issued, stats.used), (1, 1));
        }

        #[tokio::test]
        async fn image_without_decoder_is_malformed() {
            let market = market().await;
            let err = market
                .verify(
                    Some(&user("M1", Role::Merchant)),
                    ScanInput::UploadedImage(vec![0x89_u8, 0x50, 0x4e, 0x47]),
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedToken);
        }

        #[tokio::test]
        async fn admin_projection_queries() {
            let market = market().await;
            let admin = user("root", Role::Admin);
            let _issued = market
                .issue_redemption(&OfferId::from("O1"), &StudentId::from("S1"))
                .await
                .unwrap();
            assert_eq!(market.active_offers().await.unwrap().len(), 1);
            assert_eq!(market.audit_log(Some(&admin)).await.unwrap().len(), 1);
            assert_eq!(
                market
                    .redemptions_for_merchant(&MerchantId::from("M1"))
                    .await
                    .unwrap()
                    .len(),
                1
            );
            let status = market
                .set_offer_status(Some(&admin), &OfferId::from("O1"), OfferStatus::Draft)
                .await
                .unwrap();
            assert_eq!(status.status, OfferStatus::Draft);
            assert!(market.active_offers().await.unwrap().is_empty());
        }
    }
}
