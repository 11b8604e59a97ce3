//! Stateless decision logic for the ring election.
//!
//! The election manager short-circuits two cases before consulting this
//! module: a token that returned to its initiator completes the election, and
//! a busy plant forwards every token unchanged without bidding. For the
//! remaining cases the decision is a pure function of the plant's
//! participation status and the two bids, following Chang-Roberts: a
//! participant whose own token is stronger swallows weaker tokens, a late
//! joiner with a stronger bid starts its own circulation.

use crate::types::Bid;

/// What a plant does with an incoming election token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAction {
    /// Pass the token to the ring successor unchanged.
    ForwardUnchanged,
    /// Drop the token; a stronger token of ours is already circulating.
    Discard,
    /// Drop the token and circulate a fresh one carrying our own bid.
    InitiateOwn,
}

/// Decide how an idle, non-initiator plant treats a token carrying
/// `token_best`.
pub fn decide(was_participant: bool, my_bid: Bid, token_best: Bid) -> TokenAction {
    let am_i_stronger = my_bid.beats(&token_best);
    match (was_participant, am_i_stronger) {
        (true, true) => TokenAction::Discard,
        (true, false) => TokenAction::ForwardUnchanged,
        (false, true) => TokenAction::InitiateOwn,
        (false, false) => TokenAction::ForwardUnchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_with_stronger_bid_discards() {
        let action = decide(true, Bid::new(1, 0.20), Bid::new(2, 0.80));
        assert_eq!(action, TokenAction::Discard);
    }

    #[test]
    fn participant_with_weaker_bid_forwards() {
        let action = decide(true, Bid::new(1, 0.80), Bid::new(2, 0.20));
        assert_eq!(action, TokenAction::ForwardUnchanged);
    }

    #[test]
    fn late_joiner_with_stronger_bid_initiates() {
        let action = decide(false, Bid::new(3, 0.20), Bid::new(1, 0.80));
        assert_eq!(action, TokenAction::InitiateOwn);
    }

    #[test]
    fn late_joiner_with_weaker_bid_forwards() {
        let action = decide(false, Bid::new(3, 0.80), Bid::new(1, 0.20));
        assert_eq!(action, TokenAction::ForwardUnchanged);
    }

    #[test]
    fn equal_prices_resolve_by_plant_id() {
        // Same price on both sides: the higher id is the stronger bid.
        assert_eq!(
            decide(false, Bid::new(5, 0.50), Bid::new(2, 0.50)),
            TokenAction::InitiateOwn
        );
        assert_eq!(
            decide(false, Bid::new(2, 0.50), Bid::new(5, 0.50)),
            TokenAction::ForwardUnchanged
        );
    }

    #[test]
    fn placeholder_token_bid_never_wins() {
        let action = decide(false, Bid::new(1, 0.89), Bid::NONE);
        assert_eq!(action, TokenAction::InitiateOwn);
    }
}
