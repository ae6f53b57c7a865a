//! Ledger operations and LMSR trades against the per-market market maker.

use super::Engine;
use crate::collateral::{CollateralBank, Transfers};
use crate::commitment::ProofVerifier;
use crate::events::EventKind;
use crate::lmsr;
use crate::market::{TradeQuote, TradeSide};
use crate::oracle::ArbitrationOracle;
use crate::types::{HolderId, MarketId, Outcome, Tx};
use crate::utils::{bps_of, checked_add, round_down, round_up, validate_amount};
use crate::{error::Result, EngineError};
use rust_decimal::Decimal;
use tracing::debug;

impl<B: CollateralBank, A: ArbitrationOracle, V: ProofVerifier> Engine<B, A, V> {
    /// Lock `amount` collateral for `amount` pass + `amount` fail tokens
    pub fn split(&mut self, tx: &Tx, id: MarketId, amount: Decimal) -> Result<()> {
        self.transact(tx, id, |engine, transfers| {
            engine.ensure_public(id)?;
            engine.open_position(tx, id, &tx.caller, amount, transfers)
        })
    }

    /// Burn `amount` of both sides for `amount` collateral
    pub fn merge(&mut self, tx: &Tx, id: MarketId, amount: Decimal) -> Result<()> {
        self.transact(tx, id, |engine, transfers| {
            engine.ensure_public(id)?;
            engine.close_position(tx, id, &tx.caller, amount, transfers)
        })
    }

    /// Burn the caller's tokens of a resolved market and pay their value
    pub fn redeem(&mut self, tx: &Tx, id: MarketId) -> Result<Decimal> {
        self.transact(tx, id, |engine, transfers| {
            let value = engine.redeem_holder(tx, id, &tx.caller)?;
            transfers.payout(&tx.caller, value);
            Ok(value)
        })
    }

    /// Buy `amount` tokens of `outcome` from the market maker, paying at
    /// most `max_cost` including the trade fee
    pub fn buy(
        &mut self,
        tx: &Tx,
        id: MarketId,
        outcome: Outcome,
        amount: Decimal,
        max_cost: Decimal,
    ) -> Result<TradeQuote> {
        self.transact(tx, id, |engine, transfers| {
            engine.ensure_trading(id, tx)?;
            let quote = engine.quote_buy(id, outcome, amount)?;
            if quote.total > max_cost {
                return Err(EngineError::SlippageExceeded {
                    cost: quote.total,
                    limit: max_cost,
                });
            }

            let maker = HolderId::market_maker(id);
            let (market, ledger) = engine.market_and_ledger(id)?;
            let inventory = checked_add(ledger.position(id, &maker).balance(outcome), quote.collateral)?;
            if inventory < amount {
                return Err(EngineError::InsufficientLiquidity(id));
            }
            // the maker mints a full pair from the payment and keeps the other side
            ledger.split(market, &maker, quote.collateral)?;
            ledger.move_tokens(id, &maker, &tx.caller, outcome, amount)?;
            market.amm.record(outcome, amount)?;
            let opened = market.add_participation(quote.collateral)?;

            transfers.deposit(&tx.caller, quote.total);
            transfers.payout(&engine.config.treasury, quote.fee);
            engine.record_trade(tx, id, &quote);
            if let Some((from, to)) = opened {
                engine.note_state_change(tx, id, from, to);
            }
            Ok(quote)
        })
    }

    /// Sell `amount` tokens of `outcome` back to the market maker, receiving
    /// at least `min_return` after the trade fee
    pub fn sell(
        &mut self,
        tx: &Tx,
        id: MarketId,
        outcome: Outcome,
        amount: Decimal,
        min_return: Decimal,
    ) -> Result<TradeQuote> {
        self.transact(tx, id, |engine, transfers| {
            engine.ensure_trading(id, tx)?;
            let quote = engine.quote_sell(id, outcome, amount)?;
            if quote.total < min_return {
                return Err(EngineError::ReturnTooLow {
                    received: quote.total,
                    limit: min_return,
                });
            }

            let maker = HolderId::market_maker(id);
            let (market, ledger) = engine.market_and_ledger(id)?;
            ledger.move_tokens(id, &tx.caller, &maker, outcome, amount)?;
            if quote.collateral > Decimal::ZERO {
                ledger
                    .merge(market, &maker, quote.collateral)
                    .map_err(|err| match err {
                        EngineError::InsufficientBalance { .. } => EngineError::InsufficientLiquidity(id),
                        other => other,
                    })?;
            }
            market.amm.record(outcome, -amount)?;
            market.remove_participation(quote.collateral);

            transfers.payout(&tx.caller, quote.total);
            transfers.payout(&engine.config.treasury, quote.fee);
            engine.record_trade(tx, id, &quote);
            Ok(quote)
        })
    }

    /// Price of buying `amount` tokens of `outcome` now
    pub fn quote_buy(&self, id: MarketId, outcome: Outcome, amount: Decimal) -> Result<TradeQuote> {
        validate_amount(amount)?;
        let market = self.market(id)?;
        let exact = lmsr::buy_cost(
            market.amm.sold_pass,
            market.amm.sold_fail,
            outcome,
            amount,
            market.liquidity,
        )?;
        let collateral = round_up(exact);
        let fee = bps_of(collateral, self.config.trade_fee_bps)?;
        Ok(TradeQuote {
            side: TradeSide::Buy,
            outcome,
            amount,
            collateral,
            fee,
            total: checked_add(collateral, fee)?,
        })
    }

    /// Proceeds of selling `amount` tokens of `outcome` now
    pub fn quote_sell(&self, id: MarketId, outcome: Outcome, amount: Decimal) -> Result<TradeQuote> {
        validate_amount(amount)?;
        let market = self.market(id)?;
        if market.amm.sold(outcome) < amount {
            return Err(EngineError::InsufficientLiquidity(id));
        }
        let exact = lmsr::sell_return(
            market.amm.sold_pass,
            market.amm.sold_fail,
            outcome,
            amount,
            market.liquidity,
        )?;
        let collateral = round_down(exact);
        let fee = bps_of(collateral, self.config.trade_fee_bps)?;
        Ok(TradeQuote {
            side: TradeSide::Sell,
            outcome,
            amount,
            collateral,
            fee,
            total: collateral - fee,
        })
    }

    // --- Shared by public operations and commitment batches ---

    pub(super) fn open_position(
        &mut self,
        tx: &Tx,
        id: MarketId,
        holder: &HolderId,
        amount: Decimal,
        transfers: &mut Transfers,
    ) -> Result<()> {
        let (market, ledger) = self.market_and_ledger(id)?;
        ledger.split(market, holder, amount)?;
        let opened = market.add_participation(amount)?;
        transfers.deposit(holder, amount);

        self.emit(
            tx,
            Some(id),
            EventKind::Split {
                holder: holder.clone(),
                amount,
            },
        );
        if let Some((from, to)) = opened {
            self.note_state_change(tx, id, from, to);
        }
        Ok(())
    }

    pub(super) fn close_position(
        &mut self,
        tx: &Tx,
        id: MarketId,
        holder: &HolderId,
        amount: Decimal,
        transfers: &mut Transfers,
    ) -> Result<()> {
        let (market, ledger) = self.market_and_ledger(id)?;
        let released = ledger.merge(market, holder, amount)?;
        market.remove_participation(released);
        transfers.payout(holder, released);

        self.emit(
            tx,
            Some(id),
            EventKind::Merged {
                holder: holder.clone(),
                amount: released,
            },
        );
        Ok(())
    }

    /// Redeem every token `holder` owns; the caller stages the payout
    pub(super) fn redeem_holder(&mut self, tx: &Tx, id: MarketId, holder: &HolderId) -> Result<Decimal> {
        let (market, ledger) = self.market_and_ledger(id)?;
        let position = ledger.position(id, holder);
        let value = ledger.redeem(market, holder)?;
        if !position.is_empty() {
            self.emit(
                tx,
                Some(id),
                EventKind::Redeemed {
                    holder: holder.clone(),
                    pass: position.pass,
                    fail: position.fail,
                    value,
                },
            );
        }
        Ok(value)
    }

    fn record_trade(&mut self, tx: &Tx, id: MarketId, quote: &TradeQuote) {
        debug!(
            market = %id,
            trader = %tx.caller,
            side = ?quote.side,
            outcome = ?quote.outcome,
            amount = %quote.amount,
            collateral = %quote.collateral,
            fee = %quote.fee,
            "trade executed"
        );
        self.emit(
            tx,
            Some(id),
            EventKind::Traded {
                holder: tx.caller.clone(),
                side: quote.side,
                outcome: quote.outcome,
                amount: quote.amount,
                collateral: quote.collateral,
                fee: quote.fee,
            },
        );
    }

    fn ensure_trading(&self, id: MarketId, tx: &Tx) -> Result<()> {
        if !self.market(id)?.trading_open(tx.now) {
            return Err(EngineError::TradingClosed(id));
        }
        Ok(())
    }

    /// Private markets only take positions through commitments
    fn ensure_public(&self, id: MarketId) -> Result<()> {
        if self.market(id)?.privacy {
            return Err(EngineError::InvalidMarket(format!(
                "{id} takes positions through commitments only"
            )));
        }
        Ok(())
    }
}
