//! Neo4j side of the loader: connection, uniqueness constraints, and the
//! batched UNWIND upserts for nodes and relationships.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{info, warn};
use neo4rs::{query, BoltType, Graph};

use crate::records::{Airline, Airport, Route};
use crate::summary::StageReport;

type BoltRow = HashMap<String, BoltType>;

/// Uniqueness constraints created before any data is written. `IF NOT EXISTS`
/// makes re-runs safe on servers that support it; older servers answer with
/// an "already exists" error that is tolerated below.
const CONSTRAINTS: [&str; 2] = [
    "CREATE CONSTRAINT airport_id IF NOT EXISTS FOR (a:Airport) REQUIRE a.airport_id IS UNIQUE",
    "CREATE CONSTRAINT airline_id IF NOT EXISTS FOR (al:Airline) REQUIRE al.airline_id IS UNIQUE",
];

const AIRPORT_UPSERT: &str = "\
    UNWIND $rows AS row \
    MERGE (a:Airport {airport_id: row.airport_id}) \
    SET a.name = row.name, \
        a.city = row.city, \
        a.country = row.country, \
        a.iata = row.iata, \
        a.icao = row.icao, \
        a.latitude = row.latitude, \
        a.longitude = row.longitude, \
        a.altitude = row.altitude, \
        a.timezone_offset = row.timezone_offset, \
        a.dst = row.dst, \
        a.timezone = row.timezone, \
        a.type = row.type, \
        a.source = row.source";

const AIRLINE_UPSERT: &str = "\
    UNWIND $rows AS row \
    MERGE (al:Airline {airline_id: row.airline_id}) \
    SET al.name = row.name, \
        al.alias = row.alias, \
        al.iata = row.iata, \
        al.icao = row.icao, \
        al.callsign = row.callsign, \
        al.country = row.country, \
        al.active = row.active";

// Routes whose endpoint IDs match no Airport node fall out of the MATCH and
// create nothing; the chunk itself still succeeds.
const ROUTE_CREATE: &str = "\
    UNWIND $rows AS row \
    MATCH (src:Airport {airport_id: row.src_id}) \
    MATCH (dst:Airport {airport_id: row.dst_id}) \
    CREATE (src)-[:FLIGHT { \
        airline_id: row.airline_id, \
        airline_code: row.airline_code, \
        codeshare: row.codeshare, \
        stops: row.stops, \
        equipment: row.equipment \
    }]->(dst)";

// MERGE never matches on a null property, so the nullable parts of the
// composite key are coalesced to sentinels.
const ROUTE_MERGE: &str = "\
    UNWIND $rows AS row \
    MATCH (src:Airport {airport_id: row.src_id}) \
    MATCH (dst:Airport {airport_id: row.dst_id}) \
    MERGE (src)-[f:FLIGHT { \
        airline_id: coalesce(row.airline_id, -1), \
        equipment: coalesce(row.equipment, '') \
    }]->(dst) \
    SET f.airline_code = row.airline_code, \
        f.codeshare = row.codeshare, \
        f.stops = row.stops";

fn route_statement(merge_routes: bool) -> &'static str {
    if merge_routes {
        ROUTE_MERGE
    } else {
        ROUTE_CREATE
    }
}

fn put_opt_string(row: &mut BoltRow, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        row.insert(key.to_string(), v.clone().into());
    }
}

fn put_opt_i64(row: &mut BoltRow, key: &str, value: Option<i64>) {
    if let Some(v) = value {
        row.insert(key.to_string(), v.into());
    }
}

fn put_opt_f64(row: &mut BoltRow, key: &str, value: Option<f64>) {
    if let Some(v) = value {
        row.insert(key.to_string(), v.into());
    }
}

// Null properties are expressed by leaving the key out of the row map:
// `row.x` is null in Cypher for a missing key, so `SET n.x = row.x` clears
// the property exactly like an explicit null parameter would.

fn airport_row(airport: &Airport) -> BoltRow {
    let mut row: BoltRow = HashMap::new();
    row.insert("airport_id".to_string(), airport.airport_id.into());
    put_opt_string(&mut row, "name", &airport.name);
    put_opt_string(&mut row, "city", &airport.city);
    put_opt_string(&mut row, "country", &airport.country);
    put_opt_string(&mut row, "iata", &airport.iata);
    put_opt_string(&mut row, "icao", &airport.icao);
    put_opt_f64(&mut row, "latitude", airport.latitude);
    put_opt_f64(&mut row, "longitude", airport.longitude);
    put_opt_i64(&mut row, "altitude", airport.altitude);
    put_opt_f64(&mut row, "timezone_offset", airport.timezone_offset);
    put_opt_string(&mut row, "dst", &airport.dst);
    put_opt_string(&mut row, "timezone", &airport.timezone);
    put_opt_string(&mut row, "type", &airport.airport_type);
    put_opt_string(&mut row, "source", &airport.source);
    row
}

fn airline_row(airline: &Airline) -> BoltRow {
    let mut row: BoltRow = HashMap::new();
    row.insert("airline_id".to_string(), airline.airline_id.into());
    put_opt_string(&mut row, "name", &airline.name);
    put_opt_string(&mut row, "alias", &airline.alias);
    put_opt_string(&mut row, "iata", &airline.iata);
    put_opt_string(&mut row, "icao", &airline.icao);
    put_opt_string(&mut row, "callsign", &airline.callsign);
    put_opt_string(&mut row, "country", &airline.country);
    row.insert("active".to_string(), airline.active.into());
    row
}

fn route_row(route: &Route) -> BoltRow {
    let mut row: BoltRow = HashMap::new();
    row.insert("src_id".to_string(), route.src_id.into());
    row.insert("dst_id".to_string(), route.dst_id.into());
    put_opt_i64(&mut row, "airline_id", route.airline_id);
    put_opt_string(&mut row, "airline_code", &route.airline_code);
    row.insert("codeshare".to_string(), route.codeshare.into());
    row.insert("stops".to_string(), route.stops.into());
    put_opt_string(&mut row, "equipment", &route.equipment);
    row
}

/// Owns the database connection for the lifetime of the run. Dropping the
/// loader releases the connection pool on every exit path.
pub struct GraphLoader {
    graph: Graph,
    batch_size: usize,
    progress_interval: usize,
    merge_routes: bool,
}

impl GraphLoader {
    /// Connect and ping. The driver builds its pool lazily, so a `RETURN 1`
    /// round-trip is what actually proves the server is reachable and the
    /// credentials work.
    pub async fn connect(
        uri: &str,
        user: &str,
        password: &str,
        batch_size: usize,
        progress_interval: usize,
        merge_routes: bool,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(anyhow!("batch size must be at least 1"));
        }

        info!("Connecting to Neo4j at {}...", uri);
        let graph = Graph::new(uri, user, password)
            .await
            .with_context(|| format!("failed to connect to Neo4j at {}", uri))?;
        graph
            .run(query("RETURN 1"))
            .await
            .context("Neo4j is not responding to queries")?;
        info!("✅ Connected to Neo4j");

        Ok(Self {
            graph,
            batch_size,
            progress_interval,
            merge_routes,
        })
    }

    /// Create the uniqueness constraints. Safe to run repeatedly; only a
    /// non-idempotent failure (privileges, connection) is fatal.
    pub async fn create_constraints(&self) -> Result<()> {
        info!("🔒 Creating uniqueness constraints...");
        for statement in CONSTRAINTS {
            match self.graph.run(query(statement)).await {
                Ok(()) => {}
                Err(e) => {
                    let msg = format!("{:?}", e).to_lowercase();
                    if msg.contains("already exists") || msg.contains("equivalent") {
                        warn!("⚠️ Constraint already exists, skipping: {}", statement);
                    } else {
                        return Err(anyhow!("constraint creation failed: {}: {:?}", statement, e));
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn load_airports(&self, airports: &[Airport], report: &mut StageReport) {
        let rows: Vec<BoltRow> = airports.iter().map(airport_row).collect();
        self.run_chunks("airports", AIRPORT_UPSERT, rows, report).await;
    }

    pub async fn load_airlines(&self, airlines: &[Airline], report: &mut StageReport) {
        let rows: Vec<BoltRow> = airlines.iter().map(airline_row).collect();
        self.run_chunks("airlines", AIRLINE_UPSERT, rows, report).await;
    }

    pub async fn load_routes(&self, routes: &[Route], report: &mut StageReport) {
        let rows: Vec<BoltRow> = routes.iter().map(route_row).collect();
        self.run_chunks("routes", route_statement(self.merge_routes), rows, report)
            .await;
    }

    /// Submit `rows` in fixed-size chunks, one UNWIND statement (and thus one
    /// auto-committed transaction) per chunk. A rejected chunk is recorded on
    /// the report with its record range and the run moves on to the next
    /// chunk; there is no retry.
    async fn run_chunks(
        &self,
        stage: &'static str,
        statement: &str,
        rows: Vec<BoltRow>,
        report: &mut StageReport,
    ) {
        let total = rows.len();
        let mut loaded = 0usize;

        for (batch_num, chunk) in rows.chunks(self.batch_size).enumerate() {
            let first_row = batch_num * self.batch_size + 1;
            report.batches_attempted += 1;
            report.rows_attempted += chunk.len();

            let q = query(statement).param("rows", chunk.to_vec());
            match self.graph.run(q).await {
                Ok(()) => {
                    loaded += chunk.len();
                    if self.progress_interval > 0
                        && (loaded % self.progress_interval < chunk.len() || loaded == total)
                    {
                        let progress = (loaded as f64 / total as f64) * 100.0;
                        info!("📊 Progress: {:.1}% ({}/{}) {} loaded", progress, loaded, total, stage);
                    }
                }
                Err(e) => {
                    report.record_batch_failure(batch_num, first_row, chunk.len(), format!("{:?}", e));
                }
            }
        }
    }

    /// Log node and relationship counts after a completed run.
    pub async fn log_stats(&self) -> Result<()> {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        info!("[{}] 📊 Graph statistics:", timestamp);
        let airports = self.count("MATCH (a:Airport) RETURN count(a) AS count").await?;
        let airlines = self.count("MATCH (al:Airline) RETURN count(al) AS count").await?;
        let flights = self.count("MATCH ()-[f:FLIGHT]->() RETURN count(f) AS count").await?;
        info!("  Airport nodes:        {}", airports);
        info!("  Airline nodes:        {}", airlines);
        info!("  FLIGHT relationships: {}", flights);
        Ok(())
    }

    async fn count(&self, statement: &str) -> Result<i64> {
        let mut result = self
            .graph
            .execute(query(statement))
            .await
            .with_context(|| format!("statistics query failed: {}", statement))?;
        match result.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>("count").unwrap_or(0)),
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_airport() -> Airport {
        Airport {
            airport_id: 507,
            name: Some("Paris Charles de Gaulle".to_string()),
            city: Some("Paris".to_string()),
            country: Some("France".to_string()),
            iata: Some("CDG".to_string()),
            icao: Some("LFPG".to_string()),
            latitude: Some(49.0097),
            longitude: Some(2.5479),
            altitude: Some(392),
            timezone_offset: Some(1.0),
            dst: Some("E".to_string()),
            timezone: Some("Europe/Paris".to_string()),
            airport_type: Some("airport".to_string()),
            source: Some("OurAirports".to_string()),
        }
    }

    #[test]
    fn airport_row_carries_identifier_and_properties() {
        let row = airport_row(&sample_airport());
        assert!(row.contains_key("airport_id"));
        assert!(row.contains_key("iata"));
        assert!(row.contains_key("latitude"));
        assert!(row.contains_key("timezone_offset"));
        assert_eq!(row.len(), 14);
    }

    #[test]
    fn null_properties_are_left_out_of_the_row_map() {
        let mut airport = sample_airport();
        airport.iata = None;
        airport.latitude = None;
        let row = airport_row(&airport);
        // Absent keys read back as null in Cypher, so SET clears the property.
        assert!(!row.contains_key("iata"));
        assert!(!row.contains_key("latitude"));
        assert!(row.contains_key("airport_id"));
    }

    #[test]
    fn airline_row_always_carries_the_active_flag() {
        let airline = Airline {
            airline_id: 14,
            name: Some("Abacus International".to_string()),
            alias: None,
            iata: Some("1B".to_string()),
            icao: None,
            callsign: None,
            country: Some("Singapore".to_string()),
            active: false,
        };
        let row = airline_row(&airline);
        assert!(row.contains_key("airline_id"));
        assert!(row.contains_key("active"));
        assert!(!row.contains_key("alias"));
        assert!(!row.contains_key("icao"));
    }

    #[test]
    fn route_row_keys_both_endpoints() {
        let route = Route {
            airline_code: Some("BA".to_string()),
            airline_id: Some(1355),
            src_id: 3316,
            dst_id: 507,
            codeshare: false,
            stops: 0,
            equipment: Some("744 777".to_string()),
        };
        let row = route_row(&route);
        assert!(row.contains_key("src_id"));
        assert!(row.contains_key("dst_id"));
        assert!(row.contains_key("codeshare"));
        assert!(row.contains_key("stops"));
    }

    #[test]
    fn route_statement_selection_follows_the_rerun_policy() {
        assert!(route_statement(false).contains("CREATE (src)-[:FLIGHT"));
        assert!(route_statement(true).contains("MERGE (src)-[f:FLIGHT"));
        // The merge key coalesces its nullable parts.
        assert!(route_statement(true).contains("coalesce(row.airline_id, -1)"));
        assert!(route_statement(true).contains("coalesce(row.equipment, '')"));
    }

    #[test]
    fn node_statements_merge_on_the_identifier() {
        assert!(AIRPORT_UPSERT.contains("MERGE (a:Airport {airport_id: row.airport_id})"));
        assert!(AIRLINE_UPSERT.contains("MERGE (al:Airline {airline_id: row.airline_id})"));
    }
}
