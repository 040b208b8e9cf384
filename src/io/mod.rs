/// CSV and JSON export of summaries, statistics, and KPI views.
pub mod export;
