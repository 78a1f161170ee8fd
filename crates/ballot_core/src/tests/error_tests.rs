use super::*;

#[test]
fn known_revert_reasons_are_classified() {
    let cases = [
        ("UID already registered", VotingError::AlreadyRegistered),
        ("Voter has already voted", VotingError::AlreadyVoted),
        ("already delegated", VotingError::AlreadyDelegated),
        ("Voter not registered", VotingError::NotRegistered),
        ("MetaMask Tx Signature: User denied transaction signature.", VotingError::UserRejected),
    ];
    for (reason, expected) in cases {
        assert_eq!(classify_revert_reason(reason), expected, "reason: {reason}");
    }
}

#[test]
fn delegation_target_problems_keep_the_raw_reason() {
    for reason in [
        "Self-delegation is disallowed",
        "Found loop in delegation: delegation loop",
        "Delegate not registered",
    ] {
        assert_eq!(
            classify_revert_reason(reason),
            VotingError::InvalidTarget(reason.to_string())
        );
    }
}

#[test]
fn unmatched_reason_is_passed_through() {
    assert_eq!(
        classify_revert_reason("out of gas"),
        VotingError::UnknownRevert("out of gas".into())
    );
}

#[test]
fn gateway_errors_map_to_voting_errors() {
    assert_eq!(
        VotingError::from(GatewayError::Revert {
            reason: "already voted".into()
        }),
        VotingError::AlreadyVoted
    );
    assert_eq!(
        VotingError::from(GatewayError::UserRejected),
        VotingError::UserRejected
    );
    assert_eq!(
        VotingError::from(GatewayError::Unavailable("down".into())),
        VotingError::ProviderUnavailable("down".into())
    );
    assert_eq!(
        VotingError::from(GatewayError::Transport("reset".into())),
        VotingError::NetworkError("reset".into())
    );
}

#[test]
fn local_and_retryable_flags() {
    let transition = VotingError::InvalidTransition {
        action: ActionKind::Vote,
        status: SessionStatus::Voted,
    };
    assert!(transition.is_local());
    assert!(!transition.is_retryable());
    assert!(VotingError::AlreadyPending(ActionKind::Register).is_local());
    assert!(VotingError::NetworkError("reset".into()).is_retryable());
    assert!(!VotingError::AlreadyRegistered.is_retryable());
    assert!(!VotingError::AlreadyRegistered.is_local());
}
