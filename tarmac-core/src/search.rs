use serde::Deserialize;
use std::fmt;
use tracing::debug;

use crate::models::Itinerary;
use crate::repository::{RouteQuery, StoreTransaction};
use crate::service::{finish, FlightService};
use crate::session::Session;
use crate::{Classify, ErrorKind, StoreError, StoreResult};

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub origin: String,
    pub destination: String,
    #[serde(default)]
    pub direct_only: bool,
    pub day_of_month: i32,
    pub limit: i32,
}

impl SearchQuery {
    fn route(&self, limit: i64) -> RouteQuery {
        RouteQuery {
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            day_of_month: self.day_of_month,
            limit,
        }
    }
}

/// Ranked itineraries of one search, numbered from 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResults {
    pub itineraries: Vec<Itinerary>,
}

impl fmt::Display for SearchResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, it) in self.itineraries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "Itinerary {}: {} flight(s), {} minutes", i, it.leg_count(), it.total_minutes())?;
            for leg in it.legs() {
                write!(f, "\n{}", leg)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("No flights match your selection")]
    NoResults,
    #[error("Failed to search")]
    Store(#[source] StoreError),
}

impl Classify for SearchError {
    fn kind(&self) -> ErrorKind {
        match self {
            SearchError::NoResults => ErrorKind::Validation,
            SearchError::Store(_) => ErrorKind::TransientStore,
        }
    }
}

/// Order by total duration, then by the fid of each leg in turn.
pub fn rank(itineraries: &mut [Itinerary]) {
    itineraries.sort_by_key(|it| {
        (
            it.total_minutes(),
            it.first_leg().fid,
            it.second_leg().map(|f| f.fid),
        )
    });
}

/// Fill up to `limit` slots with direct flights first, then one-stop connections.
async fn collect_itineraries(
    tx: &mut dyn StoreTransaction,
    query: &SearchQuery,
) -> StoreResult<Vec<Itinerary>> {
    let limit = i64::from(query.limit);
    let mut itineraries: Vec<Itinerary> = tx
        .direct_flights(&query.route(limit))
        .await?
        .into_iter()
        .map(Itinerary::Direct)
        .collect();

    let remaining = limit - itineraries.len() as i64;
    if !query.direct_only && remaining > 0 {
        let connections = tx.one_stop_flights(&query.route(remaining)).await?;
        itineraries.extend(connections.into_iter().map(|(a, b)| Itinerary::OneStop(a, b)));
    }

    itineraries.truncate(usize::try_from(limit).unwrap_or(0));
    Ok(itineraries)
}

impl FlightService {
    /// Search itineraries for a route and day. Always replaces the session's
    /// itinerary list, even when the search fails or finds nothing.
    pub async fn search(
        &self,
        session: &mut Session,
        query: &SearchQuery,
    ) -> Result<SearchResults, SearchError> {
        session.replace_itineraries(Vec::new());
        if query.limit <= 0 {
            return Err(SearchError::NoResults);
        }

        let mut tx = self.store.begin().await.map_err(SearchError::Store)?;
        let outcome = collect_itineraries(tx.as_mut(), query)
            .await
            .map_err(SearchError::Store);
        let mut itineraries = finish(tx, outcome, SearchError::Store).await?;

        rank(&mut itineraries);
        debug!(
            "Search {} -> {} day {} found {} itineraries",
            query.origin,
            query.destination,
            query.day_of_month,
            itineraries.len()
        );

        if itineraries.is_empty() {
            return Err(SearchError::NoResults);
        }

        session.replace_itineraries(itineraries.clone());
        Ok(SearchResults { itineraries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFlightStore;
    use crate::models::fixtures::flight;
    use std::sync::Arc;

    fn seeded() -> FlightService {
        let store = MemoryFlightStore::with_flights([
            flight(1, 5, "Seattle WA", "Boston MA", 320, 10, 400),
            flight(2, 5, "Seattle WA", "Boston MA", 300, 10, 450),
            flight(3, 5, "Seattle WA", "Chicago IL", 200, 10, 150),
            flight(4, 5, "Chicago IL", "Boston MA", 110, 10, 100),
            flight(5, 5, "Chicago IL", "Boston MA", 90, 10, 140),
            flight(6, 6, "Seattle WA", "Boston MA", 100, 10, 90),
        ]);
        FlightService::new(Arc::new(store))
    }

    fn query(direct_only: bool, limit: i32) -> SearchQuery {
        SearchQuery {
            origin: "Seattle WA".to_string(),
            destination: "Boston MA".to_string(),
            direct_only,
            day_of_month: 5,
            limit,
        }
    }

    #[tokio::test]
    async fn test_direct_only_ranked_by_duration() {
        let service = seeded();
        let mut session = Session::new();
        let results = service.search(&mut session, &query(true, 10)).await.unwrap();
        let fids: Vec<i32> = results.itineraries.iter().map(|it| it.first_leg().fid).collect();
        assert_eq!(fids, vec![2, 1]);
        assert_eq!(session.itineraries().len(), 2);
    }

    #[tokio::test]
    async fn test_one_stop_fills_remaining_slots_then_sorts() {
        let service = seeded();
        let mut session = Session::new();
        let results = service.search(&mut session, &query(false, 3)).await.unwrap();
        // Two direct (300, 320) plus the fastest connection 3->5 (290).
        let minutes: Vec<i64> = results.itineraries.iter().map(Itinerary::total_minutes).collect();
        assert_eq!(minutes, vec![290, 300, 320]);
        assert_eq!(results.itineraries[0].leg_count(), 2);
    }

    #[tokio::test]
    async fn test_limit_caps_direct_results() {
        let service = seeded();
        let mut session = Session::new();
        let results = service.search(&mut session, &query(false, 1)).await.unwrap();
        assert_eq!(results.itineraries.len(), 1);
        assert_eq!(results.itineraries[0].first_leg().fid, 2);
    }

    #[tokio::test]
    async fn test_no_results_clears_previous_itineraries() {
        let service = seeded();
        let mut session = Session::new();
        service.search(&mut session, &query(true, 10)).await.unwrap();

        let mut q = query(true, 10);
        q.day_of_month = 20;
        let err = service.search(&mut session, &q).await.unwrap_err();
        assert!(matches!(err, SearchError::NoResults));
        assert_eq!(err.to_string(), "No flights match your selection");
        assert!(session.itineraries().is_empty());
    }

    #[test]
    fn test_rank_breaks_ties_by_first_leg_fid() {
        let mut its = vec![
            Itinerary::Direct(flight(9, 1, "A", "B", 100, 1, 1)),
            Itinerary::Direct(flight(4, 1, "A", "B", 100, 1, 1)),
            Itinerary::Direct(flight(7, 1, "A", "B", 50, 1, 1)),
        ];
        rank(&mut its);
        let fids: Vec<i32> = its.iter().map(|it| it.first_leg().fid).collect();
        assert_eq!(fids, vec![7, 4, 9]);
    }

    #[test]
    fn test_results_format() {
        let results = SearchResults {
            itineraries: vec![
                Itinerary::Direct(flight(2, 5, "A", "B", 30, 4, 10)),
                Itinerary::OneStop(flight(3, 5, "A", "C", 20, 4, 10), flight(4, 5, "C", "B", 25, 4, 10)),
            ],
        };
        let expected = "Itinerary 0: 1 flight(s), 30 minutes\n\
ID: 2 Day: 5 Carrier: AS Number: 102 Origin: A Dest: B Duration: 30 Capacity: 4 Price: 10\n\
Itinerary 1: 2 flight(s), 45 minutes\n\
ID: 3 Day: 5 Carrier: AS Number: 103 Origin: A Dest: C Duration: 20 Capacity: 4 Price: 10\n\
ID: 4 Day: 5 Carrier: AS Number: 104 Origin: C Dest: B Duration: 25 Capacity: 4 Price: 10";
        assert_eq!(results.to_string(), expected);
    }
}
