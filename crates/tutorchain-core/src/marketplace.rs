//! Marketplace actions: booking, tutor registration, rating, and the read
//! models behind the tutor card and profile page.
//!
//! Every write goes through [`Marketplace::with_wallet`], which connects the
//! session first when needed. Tutor profiles are cached per address; the
//! cache is derived state and is dropped on restart.

use std::collections::HashMap;
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

use crate::gateway::{
    ContractGateway, GatewayError, Rating, SessionId, SessionRecord, TransactionReceipt,
    TutorRecord,
};
use crate::wallet::{Address, AmountError, ConnectionError, WalletSession, Wei};

/// Whole-hour durations offered when booking.
pub const BOOKING_HOURS: RangeInclusive<u32> = 1..=4;

const SECONDS_PER_HOUR: u64 = 3600;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketplaceError {
    #[error("Please connect your wallet first")]
    NotConnected,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Sessions can be booked for 1 to 4 hours, got {0}")]
    InvalidHours(u32),

    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("Tutor name must not be empty")]
    EmptyName,

    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("{0} is not a listed tutor")]
    TutorNotListed(Address),

    #[error("Failed to book session: {0}")]
    Booking(#[source] GatewayError),

    #[error("Failed to register as tutor: {0}")]
    Registration(#[source] GatewayError),

    #[error("Failed to submit rating: {0}")]
    Rating(#[source] GatewayError),

    #[error("Failed to load data: {0}")]
    Lookup(#[source] GatewayError),
}

/// Price of a booking before it is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingQuote {
    pub tutor: Address,
    pub hours: u32,
    pub rate_per_hour: Wei,
    pub duration_seconds: u64,
    pub total: Wei,
}

impl BookingQuote {
    pub fn new(tutor: Address, rate_per_hour: Wei, hours: u32) -> Result<Self, MarketplaceError> {
        if !BOOKING_HOURS.contains(&hours) {
            return Err(MarketplaceError::InvalidHours(hours));
        }
        let total = rate_per_hour.checked_mul(u64::from(hours))?;
        Ok(Self {
            tutor,
            hours,
            rate_per_hour,
            duration_seconds: u64::from(hours) * SECONDS_PER_HOUR,
            total,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Booking {
    pub quote: BookingQuote,
    pub receipt: TransactionReceipt,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TutorProfile {
    pub address: Address,
    pub record: TutorRecord,
    pub average_rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEntry {
    pub id: SessionId,
    pub record: SessionRecord,
}

/// A user's sessions, split by whether they have been rated yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserSessions {
    pub rated: Vec<SessionEntry>,
    pub awaiting_rating: Vec<SessionEntry>,
}

impl UserSessions {
    pub fn total(&self) -> usize {
        self.rated.len() + self.awaiting_rating.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionEntry> {
        self.rated.iter().chain(self.awaiting_rating.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileStats {
    pub total_sessions: usize,
    pub hours_learned: f64,
    /// Mean of the ratings this user has given.
    pub average_rating: Option<f64>,
}

impl ProfileStats {
    pub fn from_sessions(sessions: &UserSessions) -> Self {
        let seconds: u64 = sessions.iter().map(|s| s.record.duration).sum();
        let average_rating = if sessions.rated.is_empty() {
            None
        } else {
            let sum: u64 = sessions
                .rated
                .iter()
                .map(|s| u64::from(s.record.rating))
                .sum();
            Some(sum as f64 / sessions.rated.len() as f64)
        };
        Self {
            total_sessions: sessions.total(),
            hours_learned: seconds as f64 / SECONDS_PER_HOUR as f64,
            average_rating,
        }
    }
}

pub struct Marketplace {
    session: Arc<WalletSession>,
    gateway: Arc<dyn ContractGateway>,
    profiles: Mutex<HashMap<Address, TutorProfile>>,
}

impl Marketplace {
    pub fn new(session: Arc<WalletSession>, gateway: Arc<dyn ContractGateway>) -> Self {
        Self {
            session,
            gateway,
            profiles: Mutex::new(HashMap::new()),
        }
    }

    pub fn session(&self) -> &Arc<WalletSession> {
        &self.session
    }

    /// Run `action` with the connected account, connecting first if needed.
    ///
    /// A failed connect is returned as is. If the session is still not
    /// connected afterwards (say an account change raced the connect), the
    /// action is skipped with [`MarketplaceError::NotConnected`].
    pub async fn with_wallet<F, Fut, T>(&self, action: F) -> Result<T, MarketplaceError>
    where
        F: FnOnce(Address) -> Fut,
        Fut: Future<Output = Result<T, MarketplaceError>>,
    {
        if !self.session.is_connected() {
            log::debug!("Wallet not connected, connecting before action");
            self.session.connect().await?;
        }
        let account = self
            .session
            .state()
            .connected_account()
            .ok_or(MarketplaceError::NotConnected)?;
        action(account).await
    }

    /// Price a booking of `hours` with `tutor` at their current rate.
    pub async fn quote(&self, tutor: &Address, hours: u32) -> Result<BookingQuote, MarketplaceError> {
        if !BOOKING_HOURS.contains(&hours) {
            return Err(MarketplaceError::InvalidHours(hours));
        }
        let profile = self.tutor_profile(tutor).await?;
        if !profile.record.is_listed {
            return Err(MarketplaceError::TutorNotListed(*tutor));
        }
        BookingQuote::new(*tutor, profile.record.rate_per_hour, hours)
    }

    /// Book and pay for a session, resolving once the transaction is mined.
    pub async fn book_session(&self, tutor: &Address, hours: u32) -> Result<Booking, MarketplaceError> {
        let quote = self.quote(tutor, hours).await?;
        let gateway = &self.gateway;
        let pending = &quote;
        let receipt = self
            .with_wallet(|account| async move {
                log::info!(
                    "{} booking {}h with {} for {}",
                    account,
                    pending.hours,
                    pending.tutor,
                    pending.total
                );
                gateway
                    .book_session(&pending.tutor, pending.duration_seconds, pending.total)
                    .await
                    .map_err(MarketplaceError::Booking)
            })
            .await?;
        self.invalidate(tutor);
        Ok(Booking { quote, receipt })
    }

    /// List the connected account as a tutor.
    pub async fn register_tutor(
        &self,
        name: &str,
        rate_eth: &str,
    ) -> Result<TransactionReceipt, MarketplaceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MarketplaceError::EmptyName);
        }
        let rate = Wei::parse_ether(rate_eth)?;
        let gateway = &self.gateway;
        let (account, receipt) = self
            .with_wallet(|account| async move {
                log::info!("Registering {} as tutor '{}' at {}/h", account, name, rate);
                let receipt = gateway
                    .list_as_tutor(name, rate)
                    .await
                    .map_err(MarketplaceError::Registration)?;
                Ok((account, receipt))
            })
            .await?;
        self.invalidate(&account);
        Ok(receipt)
    }

    /// Complete a session with a 1 to 5 star rating.
    pub async fn rate_session(
        &self,
        session_id: SessionId,
        rating: u8,
    ) -> Result<TransactionReceipt, MarketplaceError> {
        let rating = Rating::new(rating).ok_or(MarketplaceError::InvalidRating(rating))?;
        let gateway = &self.gateway;
        let receipt = self
            .with_wallet(|_| async move {
                gateway
                    .complete_session(session_id, rating)
                    .await
                    .map_err(MarketplaceError::Rating)
            })
            .await?;
        // the rated tutor's totals changed, and sessions do not record who that was
        self.clear_cache();
        Ok(receipt)
    }

    /// Registry entry plus average rating, cached per address.
    pub async fn tutor_profile(&self, tutor: &Address) -> Result<TutorProfile, MarketplaceError> {
        if let Some(profile) = self.profiles.lock().unwrap().get(tutor) {
            return Ok(profile.clone());
        }
        let record = self
            .gateway
            .get_tutor_details(tutor)
            .await
            .map_err(MarketplaceError::Lookup)?;
        let profile = TutorProfile {
            address: *tutor,
            average_rating: record.average_rating(),
            record,
        };
        self.profiles
            .lock()
            .unwrap()
            .insert(*tutor, profile.clone());
        Ok(profile)
    }

    /// All of `user`'s sessions, resolved to records.
    pub async fn user_sessions(&self, user: &Address) -> Result<UserSessions, MarketplaceError> {
        let ids = self
            .gateway
            .get_user_sessions(user)
            .await
            .map_err(MarketplaceError::Lookup)?;

        let mut sessions = UserSessions::default();
        for id in ids {
            let record = self
                .gateway
                .get_session(id)
                .await
                .map_err(MarketplaceError::Lookup)?;
            let entry = SessionEntry { id, record };
            if entry.record.is_rated() {
                sessions.rated.push(entry);
            } else {
                sessions.awaiting_rating.push(entry);
            }
        }
        Ok(sessions)
    }

    pub async fn profile_stats(&self, user: &Address) -> Result<ProfileStats, MarketplaceError> {
        let sessions = self.user_sessions(user).await?;
        Ok(ProfileStats::from_sessions(&sessions))
    }

    /// Drop all cached tutor profiles.
    pub fn clear_cache(&self) {
        self.profiles.lock().unwrap().clear();
    }

    pub fn cached_profiles(&self) -> usize {
        self.profiles.lock().unwrap().len()
    }

    fn invalidate(&self, tutor: &Address) {
        self.profiles.lock().unwrap().remove(tutor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::gateway::TxHash;
    use crate::testing::{GatewayCall, MockCall, MockGateway, MockProvider};
    use crate::wallet::ChainId;

    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";
    const TUTOR: &str = "0x0000000000000000000000000000000000007070";

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn listed_tutor(rate: Wei) -> TutorRecord {
        TutorRecord {
            name: "Ada".into(),
            rate_per_hour: rate,
            is_listed: true,
            total_sessions: 2,
            total_rating: 9,
            is_verified: true,
        }
    }

    struct Fixture {
        provider: Arc<MockProvider>,
        gateway: Arc<MockGateway>,
        marketplace: Marketplace,
    }

    fn fixture() -> Fixture {
        let provider = Arc::new(MockProvider::new());
        provider.set_accounts(vec![addr(ALICE)]);
        provider.set_chain_id(ChainId(1));
        provider.set_signer(addr(ALICE));

        let gateway = Arc::new(MockGateway::new());
        gateway.add_tutor(addr(TUTOR), listed_tutor(Wei::parse_ether("0.05").unwrap()));

        let dyn_provider: Arc<dyn crate::provider::WalletProvider> = provider.clone();
        let session = WalletSession::new(Some(dyn_provider), Arc::new(EventBus::new()));
        let dyn_gateway: Arc<dyn ContractGateway> = gateway.clone();
        Fixture {
            provider,
            gateway,
            marketplace: Marketplace::new(session, dyn_gateway),
        }
    }

    mod quotes {
        use super::*;

        #[test]
        fn total_is_rate_times_hours() {
            let quote =
                BookingQuote::new(addr(TUTOR), Wei::parse_ether("0.05").unwrap(), 3).unwrap();
            assert_eq!(quote.duration_seconds, 10_800);
            assert_eq!(quote.total.format_ether(), "0.15");
        }

        #[test]
        fn hours_outside_offer_rejected() {
            for hours in [0, 5] {
                assert_eq!(
                    BookingQuote::new(addr(TUTOR), Wei::from_wei(1), hours),
                    Err(MarketplaceError::InvalidHours(hours))
                );
            }
        }

        #[tokio::test]
        async fn unlisted_tutor_cannot_be_quoted() {
            let f = fixture();
            let result = f.marketplace.quote(&addr(ALICE), 1).await;
            assert_eq!(result, Err(MarketplaceError::TutorNotListed(addr(ALICE))));
        }
    }

    mod with_wallet {
        use super::*;

        #[tokio::test]
        async fn connects_before_running_action() {
            let f = fixture();
            assert!(!f.marketplace.session().is_connected());

            let account = f
                .marketplace
                .with_wallet(|account| async move { Ok(account) })
                .await
                .unwrap();

            assert_eq!(account, addr(ALICE));
            assert!(f.marketplace.session().is_connected());
        }

        #[tokio::test]
        async fn skips_connect_when_connected() {
            let f = fixture();
            f.marketplace.session().connect().await.unwrap();
            let before = f.provider.calls().len();

            f.marketplace
                .with_wallet(|_| async { Ok(()) })
                .await
                .unwrap();

            assert_eq!(f.provider.calls().len(), before);
        }

        #[tokio::test]
        async fn failed_connect_skips_action() {
            let f = fixture();
            f.provider.set_accounts(vec![]);
            let mut ran = false;

            let result = f
                .marketplace
                .with_wallet(|_| {
                    ran = true;
                    async { Ok(()) }
                })
                .await;

            assert_eq!(
                result,
                Err(MarketplaceError::Connection(ConnectionError::NoAccountsReturned))
            );
            assert!(!ran);
            assert_eq!(f.provider.calls(), vec![MockCall::RequestAccounts]);
        }
    }

    mod writes {
        use super::*;

        #[tokio::test]
        async fn booking_pays_quoted_total() {
            let f = fixture();

            let booking = f.marketplace.book_session(&addr(TUTOR), 2).await.unwrap();

            assert_eq!(booking.quote.total.format_ether(), "0.1");
            assert!(booking.receipt.success);
            assert!(f.gateway.calls().contains(&GatewayCall::BookSession {
                tutor: addr(TUTOR),
                duration_seconds: 7200,
                value: Wei::parse_ether("0.1").unwrap(),
            }));
        }

        #[tokio::test]
        async fn booking_failure_has_user_message() {
            let f = fixture();
            f.marketplace.tutor_profile(&addr(TUTOR)).await.unwrap();
            f.gateway
                .fail_with(GatewayError::Reverted(TxHash::repeat_byte(0xde)));

            let err = f
                .marketplace
                .book_session(&addr(TUTOR), 1)
                .await
                .unwrap_err();

            assert!(matches!(err, MarketplaceError::Booking(_)));
            assert!(err.to_string().starts_with("Failed to book session"));
        }

        #[tokio::test]
        async fn register_validates_before_connecting() {
            let f = fixture();

            assert_eq!(
                f.marketplace.register_tutor("   ", "0.01").await,
                Err(MarketplaceError::EmptyName)
            );
            assert!(matches!(
                f.marketplace.register_tutor("Ada", "cheap").await,
                Err(MarketplaceError::InvalidAmount(_))
            ));
            assert!(f.provider.calls().is_empty());
        }

        #[tokio::test]
        async fn register_lists_with_parsed_rate() {
            let f = fixture();

            f.marketplace.register_tutor(" Ada ", "0.02").await.unwrap();

            assert_eq!(
                f.gateway.calls(),
                vec![GatewayCall::ListAsTutor {
                    name: "Ada".into(),
                    rate_per_hour: Wei::parse_ether("0.02").unwrap(),
                }]
            );
        }

        #[tokio::test]
        async fn rating_outside_range_rejected() {
            let f = fixture();
            assert_eq!(
                f.marketplace.rate_session(1, 6).await,
                Err(MarketplaceError::InvalidRating(6))
            );
            assert!(f.gateway.calls().is_empty());
        }

        #[tokio::test]
        async fn rating_completes_session_and_clears_cache() {
            let f = fixture();
            f.marketplace.tutor_profile(&addr(TUTOR)).await.unwrap();
            assert_eq!(f.marketplace.cached_profiles(), 1);

            f.marketplace.rate_session(7, 4).await.unwrap();

            assert!(f.gateway.calls().contains(&GatewayCall::CompleteSession {
                session_id: 7,
                rating: 4
            }));
            assert_eq!(f.marketplace.cached_profiles(), 0);
        }
    }

    mod reads {
        use super::*;

        #[tokio::test]
        async fn tutor_profile_is_cached() {
            let f = fixture();

            let first = f.marketplace.tutor_profile(&addr(TUTOR)).await.unwrap();
            let second = f.marketplace.tutor_profile(&addr(TUTOR)).await.unwrap();

            assert_eq!(first, second);
            assert_eq!(first.average_rating, Some(4.5));
            let lookups = f
                .gateway
                .calls()
                .into_iter()
                .filter(|c| matches!(c, GatewayCall::GetTutorDetails(_)))
                .count();
            assert_eq!(lookups, 1);
        }

        #[tokio::test]
        async fn address_casing_shares_cache_entry() {
            let f = fixture();
            let checksummed = addr("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
            let lowercase = addr("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed");
            f.gateway.add_tutor(checksummed, listed_tutor(Wei::parse_ether("0.01").unwrap()));

            let first = f.marketplace.tutor_profile(&checksummed).await.unwrap();
            let second = f.marketplace.tutor_profile(&lowercase).await.unwrap();

            assert_eq!(first, second);
            assert!(second.record.is_listed);
            assert_eq!(f.marketplace.cached_profiles(), 1);
            let lookups = f
                .gateway
                .calls()
                .into_iter()
                .filter(|c| matches!(c, GatewayCall::GetTutorDetails(_)))
                .count();
            assert_eq!(lookups, 1);
        }

        #[tokio::test]
        async fn sessions_split_by_rating() {
            let f = fixture();
            let user = addr(ALICE);
            f.gateway.add_session(
                &user,
                1,
                SessionRecord { rating: 5, duration: 3600, timestamp: 10 },
            );
            f.gateway.add_session(
                &user,
                2,
                SessionRecord { rating: 0, duration: 7200, timestamp: 20 },
            );
            f.gateway.add_session(
                &user,
                3,
                SessionRecord { rating: 3, duration: 1800, timestamp: 30 },
            );

            let sessions = f.marketplace.user_sessions(&user).await.unwrap();
            assert_eq!(
                sessions.rated.iter().map(|s| s.id).collect::<Vec<_>>(),
                vec![1, 3]
            );
            assert_eq!(sessions.awaiting_rating[0].id, 2);

            let stats = f.marketplace.profile_stats(&user).await.unwrap();
            assert_eq!(stats.total_sessions, 3);
            assert_eq!(stats.hours_learned, 3.5);
            assert_eq!(stats.average_rating, Some(4.0));
        }

        #[tokio::test]
        async fn stats_for_new_user_are_empty() {
            let f = fixture();
            let stats = f.marketplace.profile_stats(&addr(TUTOR)).await.unwrap();
            assert_eq!(stats.total_sessions, 0);
            assert_eq!(stats.hours_learned, 0.0);
            assert_eq!(stats.average_rating, None);
        }

        #[tokio::test]
        async fn lookup_failure_is_reported() {
            let f = fixture();
            f.gateway.fail_with(GatewayError::NoSender);
            assert!(matches!(
                f.marketplace.user_sessions(&addr(ALICE)).await,
                Err(MarketplaceError::Lookup(GatewayError::NoSender))
            ));
        }
    }
}
