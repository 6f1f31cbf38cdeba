use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_spks_table::Migration),
            Box::new(m20240101_000002_create_spk_sequences_table::Migration),
        ]
    }
}

mod m20240101_000001_create_spks_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_spks_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Columns aligned with entities::spk Model
            manager
                .create_table(
                    Table::create()
                        .table(Spks::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Spks::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Spks::SpkNumber)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Spks::Status)
                                .string_len(32)
                                .not_null()
                                .default("ON PROGRESS"),
                        )
                        .col(
                            ColumnDef::new(Spks::IsEditable)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Spks::CustomerName).string().not_null())
                        .col(ColumnDef::new(Spks::CustomerPhone).string_len(32).null())
                        .col(ColumnDef::new(Spks::CustomerEmail).string().null())
                        .col(ColumnDef::new(Spks::Notes).text().null())
                        .col(ColumnDef::new(Spks::SalesId).uuid().null())
                        .col(ColumnDef::new(Spks::BranchId).uuid().null())
                        .col(ColumnDef::new(Spks::VehicleTypeId).uuid().null())
                        .col(
                            ColumnDef::new(Spks::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Spks::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Spks::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            // Month-window counts and date-range listing filter on created_at
            manager
                .create_index(
                    Index::create()
                        .name("idx_spks_created_at")
                        .table(Spks::Table)
                        .col(Spks::CreatedAt)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_spks_status")
                        .table(Spks::Table)
                        .col(Spks::Status)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Spks::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Spks {
        Table,
        Id,
        SpkNumber,
        Status,
        IsEditable,
        CustomerName,
        CustomerPhone,
        CustomerEmail,
        Notes,
        SalesId,
        BranchId,
        VehicleTypeId,
        CreatedAt,
        UpdatedAt,
        Version,
    }
}

mod m20240101_000002_create_spk_sequences_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_spk_sequences_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // One counter row per (year, month); the composite key is the upsert target
            manager
                .create_table(
                    Table::create()
                        .table(SpkSequences::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(SpkSequences::Year).integer().not_null())
                        .col(ColumnDef::new(SpkSequences::Month).integer().not_null())
                        .col(
                            ColumnDef::new(SpkSequences::LastValue)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SpkSequences::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(SpkSequences::Year)
                                .col(SpkSequences::Month),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SpkSequences::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum SpkSequences {
        Table,
        Year,
        Month,
        LastValue,
        UpdatedAt,
    }
}
