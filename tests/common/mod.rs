pub mod budget_alloc;
