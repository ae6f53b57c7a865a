//! Oracle reports, challenges, arbitration and settlement.
//!
//! ```text
//! submit_report ──> Challenge ──(window elapses)──────────────> Finalized ──> execute
//!                       │                                          ^
//!                       └─ challenge_report ──> Escalated ──> deliver_verdict
//! ```

use super::{authenticate, Engine};
use crate::collateral::{CollateralBank, Transfers};
use crate::commitment::ProofVerifier;
use crate::dispute::{check_payout, BondKind, Challenge, OracleReport};
use crate::events::EventKind;
use crate::market::MarketState;
use crate::oracle::{ArbitrationOracle, ArbitrationRequest, ArbitrationTicket, ConditionFeed, EvidenceBundle, Verdict};
use crate::types::{HolderId, MarketId, Payout, ReportId, Tx};
use crate::{error::Result, EngineError};
use rust_decimal::Decimal;
use tracing::{info, warn};

impl<B: CollateralBank, A: ArbitrationOracle, V: ProofVerifier> Engine<B, A, V> {
    /// Report the payout vector `(pass, fail)` of a market awaiting its
    /// report, locking `bond`. Opens the challenge window.
    pub fn submit_report(
        &mut self,
        tx: &Tx,
        id: MarketId,
        pass: Decimal,
        fail: Decimal,
        evidence_ref: impl Into<String>,
        bond: Decimal,
    ) -> Result<ReportId> {
        let evidence_ref = evidence_ref.into();
        self.transact(tx, id, |engine, transfers| {
            engine.ensure_reportable(tx, id)?;
            let payout = Payout::new(pass, fail)?;
            engine.file_report(tx, id, payout, evidence_ref, bond, transfers)
        })
    }

    /// Report the outcome the condition feed holds for the market's
    /// `condition_ref`. The report is bonded and challengeable like any other.
    pub fn report_from_feed(
        &mut self,
        tx: &Tx,
        id: MarketId,
        bond: Decimal,
        feed: &impl ConditionFeed,
    ) -> Result<ReportId> {
        self.transact(tx, id, |engine, transfers| {
            engine.ensure_reportable(tx, id)?;
            let condition_ref = engine
                .market(id)?
                .condition_ref
                .clone()
                .ok_or_else(|| EngineError::InvalidMarket(format!("{id} has no condition reference")))?;
            if !feed.is_resolved(&condition_ref) {
                return Err(EngineError::ConditionUnresolved(condition_ref));
            }
            let outcome = feed
                .get_outcome(&condition_ref)
                .ok_or_else(|| EngineError::ConditionUnresolved(condition_ref.clone()))?;
            let payout = outcome.payout()?;
            let evidence_ref = format!("feed:{condition_ref}");
            engine.file_report(tx, id, payout, evidence_ref, bond, transfers)
        })
    }

    /// Dispute the active report, locking a bond strictly above the
    /// reporter's. Moves the market to `Escalated`.
    pub fn challenge_report(
        &mut self,
        tx: &Tx,
        id: MarketId,
        counter_evidence_ref: impl Into<String>,
        bond: Decimal,
    ) -> Result<()> {
        let counter_evidence_ref = counter_evidence_ref.into();
        self.transact(tx, id, |engine, transfers| {
            let report_id = engine.challengeable_report(id)?;
            let report = engine
                .store
                .reports
                .get(&report_id)
                .ok_or(EngineError::NoActiveReport(id))?;
            if report.reporter == tx.caller {
                return Err(EngineError::unauthorized(&tx.caller, "challenge their own report"));
            }
            let reporter_bond = engine.bond(report.bond)?.amount;
            if bond <= reporter_bond {
                return Err(EngineError::BondTooLow {
                    required: reporter_bond,
                    offered: bond,
                });
            }

            let bond_id = engine.post_bond(tx, id, BondKind::Challenge, bond, transfers)?;
            engine.store.challenges.insert(
                report_id,
                Challenge {
                    report: report_id,
                    challenger: tx.caller.clone(),
                    counter_evidence_ref: counter_evidence_ref.clone(),
                    bond: bond_id,
                    filed_at: tx.now,
                    escalated: false,
                    ticket: None,
                },
            );
            engine.emit(
                tx,
                Some(id),
                EventKind::Challenged {
                    report: report_id,
                    challenger: tx.caller.clone(),
                    counter_evidence_ref,
                },
            );
            info!(market = %id, report = %report_id, challenger = %tx.caller, %bond, "report challenged");
            engine.set_state(tx, id, MarketState::Escalated)
        })
    }

    /// Hand both evidence bundles of a challenged report to the arbitration
    /// oracle. The verdict arrives later through [`Engine::deliver_verdict`].
    pub fn escalate(&mut self, tx: &Tx, id: MarketId) -> Result<ArbitrationTicket> {
        self.transact(tx, id, |engine, _| {
            let market = engine.market(id)?;
            match market.state {
                MarketState::Escalated => {}
                state if state.is_settled() => return Err(EngineError::AlreadyFinalized(id)),
                state => {
                    return Err(EngineError::InvalidState {
                        market: id,
                        state,
                        action: "escalate",
                    })
                }
            }
            let report_id = market.active_report.ok_or(EngineError::NoActiveReport(id))?;
            let report = engine
                .store
                .reports
                .get(&report_id)
                .ok_or(EngineError::NoActiveReport(id))?;
            let challenge = engine
                .store
                .challenges
                .get(&report_id)
                .ok_or(EngineError::NoActiveReport(id))?;
            if challenge.escalated {
                return Err(EngineError::ArbitrationPending(id));
            }

            let request = ArbitrationRequest {
                market: id,
                question: market.question.clone(),
                report: EvidenceBundle {
                    party: report.reporter.clone(),
                    claimed_payout: Some(report.payout),
                    evidence_ref: report.evidence_ref.clone(),
                    bond: engine.bond(report.bond)?.amount,
                },
                challenge: EvidenceBundle {
                    party: challenge.challenger.clone(),
                    claimed_payout: None,
                    evidence_ref: challenge.counter_evidence_ref.clone(),
                    bond: engine.bond(challenge.bond)?.amount,
                },
            };
            let ticket = engine.arbitrator.escalate(&request).map_err(|err| {
                warn!(market = %id, error = %err, "arbitration oracle rejected escalation");
                EngineError::from(err)
            })?;

            if let Some(challenge) = engine.store.challenges.get_mut(&report_id) {
                challenge.escalated = true;
                challenge.ticket = Some(ticket.clone());
            }
            engine.emit(
                tx,
                Some(id),
                EventKind::Escalated {
                    report: report_id,
                    ticket: ticket.clone(),
                },
            );
            info!(market = %id, report = %report_id, %ticket, "dispute escalated");
            Ok(ticket)
        })
    }

    /// Apply the arbitrator's decision. The loser's bond is slashed to the
    /// winner, less the protocol fee; the winner's own bond is returned.
    pub fn deliver_verdict(
        &mut self,
        tx: &Tx,
        id: MarketId,
        ticket: &ArbitrationTicket,
        verdict: Verdict,
    ) -> Result<()> {
        authenticate(tx)?;
        if tx.caller != self.config.arbitrator {
            return Err(EngineError::unauthorized(&tx.caller, "deliver verdicts"));
        }

        self.transact(tx, id, |engine, transfers| {
            let market = engine.market(id)?;
            match market.state {
                MarketState::Escalated => {}
                state if state.is_settled() => return Err(EngineError::AlreadyFinalized(id)),
                state => {
                    return Err(EngineError::InvalidState {
                        market: id,
                        state,
                        action: "deliver a verdict",
                    })
                }
            }
            let report_id = market.active_report.ok_or(EngineError::NoActiveReport(id))?;
            let challenge = engine
                .store
                .challenges
                .get(&report_id)
                .ok_or(EngineError::NoActiveReport(id))?;
            if challenge.ticket.as_ref() != Some(ticket) {
                return Err(EngineError::TicketMismatch(id));
            }
            let (challenger, challenge_bond) = (challenge.challenger.clone(), challenge.bond);
            let report = engine
                .store
                .reports
                .get(&report_id)
                .ok_or(EngineError::NoActiveReport(id))?;
            let (reporter, report_bond, reported) = (report.reporter.clone(), report.bond, report.payout);
            let fee_bps = engine.config.protocol_fee_bps;

            let (payout, upheld) = match verdict {
                Verdict::UpholdReport => {
                    engine.return_bond(tx, report_bond, transfers)?;
                    engine.slash_bond(tx, challenge_bond, &reporter, fee_bps, transfers)?;
                    (reported, true)
                }
                Verdict::Overturn(payout) => {
                    check_payout(&payout, engine.config.allow_fractional_payouts)?;
                    engine.return_bond(tx, challenge_bond, transfers)?;
                    engine.slash_bond(tx, report_bond, &challenger, fee_bps, transfers)?;
                    let market = engine.market_mut(id)?;
                    market.active_report = None;
                    market.archived_reports.push(report_id);
                    (payout, false)
                }
            };

            engine.market_mut(id)?.pending_payout = Some(payout);
            engine.emit(
                tx,
                Some(id),
                EventKind::VerdictApplied {
                    report: report_id,
                    upheld,
                    payout,
                },
            );
            info!(market = %id, report = %report_id, upheld, %payout, "verdict applied");
            engine.set_state(tx, id, MarketState::Finalized)
        })
    }

    /// Finalize an unchallenged report once its window has elapsed
    pub fn finalize(&mut self, tx: &Tx, id: MarketId) -> Result<()> {
        authenticate(tx)?;
        let before = self.market(id)?.state;
        let after = self.advance(tx, id)?;
        if before == MarketState::Challenge && after == MarketState::Finalized {
            return Ok(());
        }
        Err(match after {
            MarketState::Challenge => EngineError::ChallengeWindowOpen(id),
            MarketState::Escalated => EngineError::ArbitrationPending(id),
            MarketState::AwaitingReport => EngineError::NoActiveReport(id),
            state if state.is_settled() => EngineError::AlreadyFinalized(id),
            state => EngineError::InvalidState {
                market: id,
                state,
                action: "finalize",
            },
        })
    }

    /// Apply the finalized payout: `Executed` if pass is ahead, `Rejected`
    /// otherwise. Returns the terminal state.
    pub fn execute(&mut self, tx: &Tx, id: MarketId) -> Result<MarketState> {
        self.transact(tx, id, |engine, transfers| {
            let market = engine.market(id)?;
            let payout = match market.state {
                MarketState::Finalized => market.pending_payout.ok_or(EngineError::InvalidState {
                    market: id,
                    state: market.state,
                    action: "execute",
                })?,
                state if state.is_terminal() => return Err(EngineError::AlreadyFinalized(id)),
                state => {
                    return Err(EngineError::InvalidState {
                        market: id,
                        state,
                        action: "execute",
                    })
                }
            };
            let proposal_bond = market.proposal_bond;

            engine.apply_resolution(tx, id, payout, transfers)?;
            if let Some(bond) = proposal_bond {
                engine.return_bond(tx, bond, transfers)?;
            }
            let outcome = if payout.pass > payout.fail {
                MarketState::Executed
            } else {
                MarketState::Rejected
            };
            engine.set_state(tx, id, outcome)?;
            Ok(outcome)
        })
    }

    /// Settle a cancelled market at the even payout. The proposal bond goes
    /// to the treasury.
    pub fn refund(&mut self, tx: &Tx, id: MarketId) -> Result<()> {
        self.transact(tx, id, |engine, transfers| {
            let market = engine.market(id)?;
            match market.state {
                MarketState::Cancelled => {}
                state if state.is_settled() => return Err(EngineError::AlreadyFinalized(id)),
                state => {
                    return Err(EngineError::InvalidState {
                        market: id,
                        state,
                        action: "refund",
                    })
                }
            }
            let proposal_bond = market.proposal_bond;

            engine.apply_resolution(tx, id, Payout::EVEN, transfers)?;
            if let Some(bond) = proposal_bond {
                let treasury = engine.config.treasury.clone();
                engine.slash_bond(tx, bond, &treasury, 0, transfers)?;
            }
            engine.set_state(tx, id, MarketState::Refunded)
        })
    }

    /// Clock step for a challenge window that elapsed without a challenge
    pub(super) fn finalize_unchallenged(&mut self, tx: &Tx, id: MarketId, transfers: &mut Transfers) -> Result<()> {
        let report_id = self
            .market(id)?
            .active_report
            .ok_or(EngineError::NoActiveReport(id))?;
        let report = self
            .store
            .reports
            .get(&report_id)
            .ok_or(EngineError::NoActiveReport(id))?;
        let (bond, payout) = (report.bond, report.payout);

        self.return_bond(tx, bond, transfers)?;
        self.market_mut(id)?.pending_payout = Some(payout);
        info!(market = %id, report = %report_id, %payout, "challenge window elapsed");
        self.set_state(tx, id, MarketState::Finalized)
    }

    // --- Internals ---

    fn ensure_reportable(&self, tx: &Tx, id: MarketId) -> Result<()> {
        let market = self.market(id)?;
        match market.state {
            MarketState::AwaitingReport => {}
            state if state.is_settled() => return Err(EngineError::AlreadyFinalized(id)),
            state => {
                return Err(EngineError::InvalidState {
                    market: id,
                    state,
                    action: "submit a report",
                })
            }
        }
        if market
            .designated_reporter
            .as_ref()
            .is_some_and(|reporter| *reporter != tx.caller)
        {
            return Err(EngineError::unauthorized(&tx.caller, "report on this market"));
        }
        Ok(())
    }

    fn file_report(
        &mut self,
        tx: &Tx,
        id: MarketId,
        payout: Payout,
        evidence_ref: String,
        bond: Decimal,
        transfers: &mut Transfers,
    ) -> Result<ReportId> {
        check_payout(&payout, self.config.allow_fractional_payouts)?;
        if bond < self.config.min_report_bond {
            return Err(EngineError::BondTooLow {
                required: self.config.min_report_bond,
                offered: bond,
            });
        }
        let challenge_deadline = tx
            .now
            .checked_add(self.config.challenge_window)
            .ok_or(EngineError::Overflow)?;

        let bond_id = self.post_bond(tx, id, BondKind::OracleReport, bond, transfers)?;
        self.store.last_report += 1;
        let report_id = ReportId(self.store.last_report);
        self.store.reports.insert(
            report_id,
            OracleReport {
                id: report_id,
                market: id,
                reporter: tx.caller.clone(),
                payout,
                evidence_ref: evidence_ref.clone(),
                submitted_at: tx.now,
                bond: bond_id,
            },
        );
        let market = self.market_mut(id)?;
        market.active_report = Some(report_id);
        market.challenge_deadline = Some(challenge_deadline);

        self.emit(
            tx,
            Some(id),
            EventKind::ReportSubmitted {
                report: report_id,
                reporter: tx.caller.clone(),
                payout,
                evidence_ref,
            },
        );
        info!(market = %id, report = %report_id, reporter = %tx.caller, %payout, %bond, "report submitted");
        self.set_state(tx, id, MarketState::Challenge)?;
        Ok(report_id)
    }

    /// The report a challenge filed now would target
    fn challengeable_report(&self, id: MarketId) -> Result<ReportId> {
        let market = self.market(id)?;
        match market.state {
            MarketState::Challenge => market.active_report.ok_or(EngineError::NoActiveReport(id)),
            MarketState::Escalated => Err(EngineError::AlreadyChallenged(id)),
            MarketState::AwaitingReport => Err(EngineError::NoActiveReport(id)),
            state if state.is_settled() => {
                let last = market
                    .active_report
                    .or_else(|| market.archived_reports.last().copied());
                Err(match last {
                    Some(report) if self.store.challenges.contains_key(&report) => {
                        EngineError::AlreadyChallenged(id)
                    }
                    Some(_) => EngineError::ChallengeWindowExpired(id),
                    None => EngineError::InvalidState {
                        market: id,
                        state,
                        action: "challenge",
                    },
                })
            }
            state => Err(EngineError::InvalidState {
                market: id,
                state,
                action: "challenge",
            }),
        }
    }

    /// Fix the payout and pay the market maker's inventory to the creator
    fn apply_resolution(&mut self, tx: &Tx, id: MarketId, payout: Payout, transfers: &mut Transfers) -> Result<()> {
        self.market_mut(id)?.resolve(payout)?;
        self.emit(tx, Some(id), EventKind::Resolved { payout });

        let maker = HolderId::market_maker(id);
        let value = self.redeem_holder(tx, id, &maker)?;
        let creator = self.market(id)?.creator.clone();
        transfers.payout(&creator, value);
        info!(market = %id, %payout, maker_value = %value, "market resolved");
        Ok(())
    }
}
