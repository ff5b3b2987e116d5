mod entropy_quality;
mod replay_concurrency;
mod secret_creation_race;
