//! Human-readable coupon codes.
//!
//! A generated code looks like `EDU-1A2B-3C4D-X9QZ`: a fixed prefix, the
//! last four characters of the offer ID, the last four characters of the
//! student ID and four random base-36 characters, uppercased and joined by
//! `-`.
//!
//! The random segment only keeps codes of different offer/student pairs
//! with colliding ID suffixes apart when typed by hand. It is printed on
//! the student's screen and easy to guess, so a coupon code never works as
//! a credential for in-store verification; that is what the QR token in
//! [`crate::token`] is for.

use rand::Rng;

use crate::models::{Offer, OfferId, StudentId};

/// Default code prefix.
pub const DEFAULT_PREFIX: &str = "EDU";

/// Segment delimiter.
const DELIMITER: char = '-';

/// Length of each ID-derived and random segment.
const SEGMENT_LEN: usize = 4;

/// Radix of the random segment.
const RANDOM_RADIX: u32 = 36;

/// Generates a coupon code for an offer/student pair.
#[inline]
#[must_use]
pub fn generate<R: Rng + ?Sized>(
    rng: &mut R,
    prefix: &str,
    offer_id: &OfferId,
    student_id: &StudentId,
) -> String {
    let mut code = String::with_capacity(prefix.len() + 3 * (SEGMENT_LEN + 1));
    code.push_str(prefix);
    for segment in [
        id_tail(offer_id.as_inner()),
        id_tail(student_id.as_inner()),
        random_segment(rng),
    ] {
        code.push(DELIMITER);
        code.push_str(&segment);
    }
    code
}

/// Returns the code a student receives for `offer`: the offer's static
/// template when it has one, a generated code otherwise.
#[inline]
#[must_use]
pub fn code_for<R: Rng + ?Sized>(
    rng: &mut R,
    prefix: &str,
    offer: &Offer,
    student_id: &StudentId,
) -> String {
    offer.code_template.as_ref().map_or_else(
        || generate(rng, prefix, &offer.id, student_id),
        Clone::clone,
    )
}

/// Last [`SEGMENT_LEN`] characters of `id`, uppercased. Shorter IDs are
/// used whole.
fn id_tail(id: &str) -> String {
    let skip = id.chars().count().saturating_sub(SEGMENT_LEN);
    id.chars()
        .skip(skip)
        .map(|ch| ch.to_ascii_uppercase())
        .collect()
}

/// [`SEGMENT_LEN`] random uppercase base-36 characters.
fn random_segment<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SEGMENT_LEN)
        .filter_map(|_| char::from_digit(rng.random_range(0..RANDOM_RADIX), RANDOM_RADIX))
        .map(|ch| ch.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MerchantId, NewOffer, RedemptionMethod};
    use chrono::DateTime;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn offer_with_template(template: Option<&str>) -> Offer {
        let mut offer = NewOffer {
            title: "Deal".to_owned(),
            description: "Deal".to_owned(),
            category: "misc".to_owned(),
            discount_percent: 10,
            redirect_url: "https://example.com".to_owned(),
            redemption_type: RedemptionMethod::Code,
            student_cap: 0,
            code_template: template.map(str::to_owned),
            valid_for_days: None,
        }
        .into_offer(
            MerchantId::from("m-1"),
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        );
        offer.id = OfferId::from("offer-00ab12");
        offer
    }

    #[test]
    fn generated_code_layout() {
        let mut rng = StdRng::seed_from_u64(7);
        let code = generate(
            &mut rng,
            DEFAULT_PREFIX,
            &OfferId::from("550e8400-e29b-41d4-a716-44665544c0de"),
            &StudentId::from("stu-00af"),
        );
        let parts: Vec<&str> = code.split(DELIMITER).collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "EDU");
        assert_eq!(parts[1], "C0DE");
        assert_eq!(parts[2], "00AF");
        assert_eq!(parts[3].len(), 4);
        assert!(
            parts[3]
                .chars()
                .all(|ch| ch.is_ascii_digit() || ch.is_ascii_uppercase())
        );
    }

    #[test]
    fn short_ids_are_used_whole() {
        let mut rng = StdRng::seed_from_u64(1);
        let code = generate(&mut rng, "X", &OfferId::from("o1"), &StudentId::from("s"));
        assert!(code.starts_with("X-O1-S-"));
    }

    #[test]
    fn same_seed_same_code() {
        let offer = OfferId::from("o-1234");
        let student = StudentId::from("s-5678");
        let first = generate(&mut StdRng::seed_from_u64(42), "EDU", &offer, &student);
        let second = generate(&mut StdRng::seed_from_u64(42), "EDU", &offer, &student);
        assert_eq!(first, second);
    }

    #[test]
    fn random_segment_varies() {
        let mut rng = StdRng::seed_from_u64(3);
        let offer = OfferId::from("o-1234");
        let student = StudentId::from("s-5678");
        let codes: std::collections::HashSet<String> = (0..50)
            .map(|_| generate(&mut rng, "EDU", &offer, &student))
            .collect();
        assert!(codes.len() > 40);
    }

    #[test]
    fn template_overrides_generation() {
        let mut rng = StdRng::seed_from_u64(9);
        let offer = offer_with_template(Some("STUDENT10"));
        assert_eq!(
            code_for(&mut rng, "EDU", &offer, &StudentId::from("s-1")),
            "STUDENT10"
        );
        assert_eq!(
            code_for(&mut rng, "EDU", &offer, &StudentId::from("s-2")),
            "STUDENT10"
        );
    }

    #[test]
    fn no_template_generates() {
        let mut rng = StdRng::seed_from_u64(9);
        let offer = offer_with_template(None);
        let code = code_for(&mut rng, "EDU", &offer, &StudentId::from("s-0001"));
        assert!(code.starts_with("EDU-AB12-0001-"));
    }
}
